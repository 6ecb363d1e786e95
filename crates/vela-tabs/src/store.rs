//! Tab state store
//!
//! `TabStateStore` is the single authoritative owner of the tab list and the
//! selected id. All access goes through a serialized command channel: the
//! store is a spawned task that receives envelopes over an mpsc channel and
//! handles each one to full completion, repository awaits included, before
//! taking the next. No other task ever touches the list, so readers can
//! never observe a partial mutation.
//!
//! Internal follow-up mutations (re-adding a default tab after the last tab
//! closes) call the core's private methods directly rather than resubmitting
//! through the channel, which would deadlock the loop against itself.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use crate::command::{Command, Execution, Outcome};
use crate::error::TabError;
use crate::observer::{ObserverRegistry, Subscription, TabObserver};
use crate::policy::{AddPosition, AddSpeed, PositioningPolicy, SelectionStrategy};
use crate::repository::TabRepository;
use crate::state::TabList;
use crate::tab::{ContentType, Tab, TabId};
use crate::Result;

const COMMAND_CHANNEL_CAPACITY: usize = 64;

/// What to do when hydrating the initial tab list from the repository fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HydrationPolicy {
    /// Propagate the failure out of `spawn`.
    Fatal,
    /// Log the failure and start with a memory-only default tab.
    Tolerate,
}

/// Messages carried on the serialized channel. Public commands travel as
/// `Submit`; observer management and the deferred half of a delayed add are
/// control envelopes outside the public command surface.
enum Envelope {
    Submit {
        command: Command,
        reply: oneshot::Sender<Execution>,
    },
    Attach {
        observer: Arc<dyn TabObserver>,
        notify_immediately: bool,
        reply: oneshot::Sender<Subscription>,
    },
    Detach {
        subscription: Subscription,
    },
    Sweep {
        reply: oneshot::Sender<usize>,
    },
    FinishDeferredAdd {
        id: TabId,
        select: bool,
    },
}

/// Cloneable handle to the store task.
#[derive(Clone)]
pub struct TabStateStore {
    tx: mpsc::Sender<Envelope>,
}

impl TabStateStore {
    /// Hydrates the tab list from `repository` and spawns the store loop.
    ///
    /// Hydration fetches all persisted tabs; when the repository is empty a
    /// default tab is synthesized and persisted so the list is never empty.
    /// The persisted selection is restored if it still refers to a live tab,
    /// otherwise the first tab is selected. Repository failures during this
    /// phase are handled per `hydration`.
    pub async fn spawn(
        policy: PositioningPolicy,
        strategy: Arc<dyn SelectionStrategy>,
        repository: Arc<dyn TabRepository>,
        hydration: HydrationPolicy,
    ) -> Result<Self> {
        let (tx, rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let mut core = Core::new(policy, strategy, repository, tx.downgrade());

        if let Err(err) = core.hydrate().await {
            match hydration {
                HydrationPolicy::Fatal => return Err(err),
                HydrationPolicy::Tolerate => {
                    tracing::warn!(
                        error = %err,
                        "hydration failed; starting with a memory-only default tab"
                    );
                    core.recover_unpersisted();
                }
            }
        }

        tokio::spawn(run(core, rx));
        Ok(Self { tx })
    }

    /// Submits a command and waits for its execution record. The returned
    /// record is always `Finished`.
    pub async fn submit(&self, command: Command) -> Execution {
        let record = Execution::NotStarted;
        tracing::trace!(command = command.name(), state = ?record, "command enqueued");

        let (reply_tx, reply_rx) = oneshot::channel();
        let envelope = Envelope::Submit {
            command,
            reply: reply_tx,
        };
        if self.tx.send(envelope).await.is_err() {
            return Execution::Finished(Err(TabError::StoreClosed));
        }
        match reply_rx.await {
            Ok(execution) => execution,
            Err(_) => Execution::Finished(Err(TabError::StoreClosed)),
        }
    }

    pub async fn count(&self) -> Result<usize> {
        match self.submit(Command::GetCount).await.into_result()? {
            Outcome::Count(count) => Ok(count),
            other => unreachable!("get_count returned {other:?}"),
        }
    }

    pub async fn selected_id(&self) -> Result<TabId> {
        match self.submit(Command::GetSelectedId).await.into_result()? {
            Outcome::SelectedId(id) => Ok(id),
            other => unreachable!("get_selected_id returned {other:?}"),
        }
    }

    pub async fn all(&self) -> Result<Vec<Tab>> {
        match self.submit(Command::GetAll).await.into_result()? {
            Outcome::Tabs(tabs) => Ok(tabs),
            other => unreachable!("get_all returned {other:?}"),
        }
    }

    /// Adds a tab per the positioning policy. Returns the insertion index.
    pub async fn add_tab(&self, tab: Tab) -> Result<usize> {
        match self.submit(Command::Add { tab }).await.into_result()? {
            Outcome::Added { index } => Ok(index),
            other => unreachable!("add returned {other:?}"),
        }
    }

    /// Closes a tab. Returns the newly selected id, or `None` when the
    /// selection did not change.
    pub async fn close_tab(&self, tab: Tab) -> Result<Option<TabId>> {
        match self.submit(Command::Close { tab }).await.into_result()? {
            Outcome::Closed { new_selected } => Ok(new_selected),
            other => unreachable!("close returned {other:?}"),
        }
    }

    /// Closes the tab with `id`; an absent id succeeds as a no-op.
    pub async fn close_tab_by_id(&self, id: TabId) -> Result<Option<TabId>> {
        match self.submit(Command::CloseById { id }).await.into_result()? {
            Outcome::Closed { new_selected } => Ok(new_selected),
            Outcome::AlreadyAbsent => Ok(None),
            other => unreachable!("close_by_id returned {other:?}"),
        }
    }

    /// Closes every tab and recreates a single default tab, returning it.
    pub async fn close_all_tabs(&self) -> Result<Tab> {
        match self.submit(Command::CloseAll).await.into_result()? {
            Outcome::ClosedAll { default_tab } => Ok(default_tab),
            other => unreachable!("close_all returned {other:?}"),
        }
    }

    pub async fn select_tab(&self, tab: Tab) -> Result<()> {
        self.submit(Command::Select { tab }).await.into_result()?;
        Ok(())
    }

    pub async fn replace_content(&self, content: ContentType) -> Result<()> {
        self.submit(Command::ReplaceContent { content })
            .await
            .into_result()?;
        Ok(())
    }

    pub async fn update_preview(&self, image: Option<Vec<u8>>) -> Result<()> {
        self.submit(Command::UpdatePreview { image })
            .await
            .into_result()?;
        Ok(())
    }

    /// Attaches an observer. With `notify_immediately` the observer is
    /// replayed the current count, tab snapshot, and selection before this
    /// call returns.
    pub async fn attach_observer(
        &self,
        observer: Arc<dyn TabObserver>,
        notify_immediately: bool,
    ) -> Result<Subscription> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let envelope = Envelope::Attach {
            observer,
            notify_immediately,
            reply: reply_tx,
        };
        if self.tx.send(envelope).await.is_err() {
            return Err(TabError::StoreClosed);
        }
        reply_rx.await.map_err(|_| TabError::StoreClosed)
    }

    pub async fn detach_observer(&self, subscription: Subscription) -> Result<()> {
        self.tx
            .send(Envelope::Detach { subscription })
            .await
            .map_err(|_| TabError::StoreClosed)
    }

    /// Compacts flagged-dead observer slots. Returns the count reclaimed.
    pub async fn sweep_observers(&self) -> Result<usize> {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .tx
            .send(Envelope::Sweep { reply: reply_tx })
            .await
            .is_err()
        {
            return Err(TabError::StoreClosed);
        }
        reply_rx.await.map_err(|_| TabError::StoreClosed)
    }
}

/// Single-consumer loop: exactly one envelope in flight at a time.
async fn run(mut core: Core, mut rx: mpsc::Receiver<Envelope>) {
    while let Some(envelope) = rx.recv().await {
        match envelope {
            Envelope::Submit { command, reply } => {
                let record = Execution::Started(Some(command.clone()));
                tracing::trace!(command = command.name(), state = ?record, "command started");

                let result = core.execute(command).await;
                if let Err(err) = &result {
                    tracing::debug!(error = %err, "command failed");
                }
                let _ = reply.send(Execution::Finished(result));
            }
            Envelope::Attach {
                observer,
                notify_immediately,
                reply,
            } => {
                let _ = reply.send(core.attach(observer, notify_immediately));
            }
            Envelope::Detach { subscription } => core.registry.detach(subscription),
            Envelope::Sweep { reply } => {
                let _ = reply.send(core.registry.sweep());
            }
            Envelope::FinishDeferredAdd { id, select } => core.finish_add(id, select),
        }
    }
    tracing::debug!("tab store loop exited");
}

/// The store's state and command handlers. Owned exclusively by the loop
/// task; nothing outside this module can reach it.
struct Core {
    state: TabList,
    policy: PositioningPolicy,
    strategy: Arc<dyn SelectionStrategy>,
    repository: Arc<dyn TabRepository>,
    registry: ObserverRegistry,
    /// Weak handle to the store's own channel for deferred-add resumption.
    /// Weak so pending delays never keep a discarded store alive.
    tx: mpsc::WeakSender<Envelope>,
}

impl Core {
    fn new(
        policy: PositioningPolicy,
        strategy: Arc<dyn SelectionStrategy>,
        repository: Arc<dyn TabRepository>,
        tx: mpsc::WeakSender<Envelope>,
    ) -> Self {
        Self {
            state: TabList::new(policy.default_selected_id),
            policy,
            strategy,
            repository,
            registry: ObserverRegistry::new(),
            tx,
        }
    }

    async fn hydrate(&mut self) -> Result<()> {
        for tab in self.repository.fetch_all().await? {
            self.state.push(tab);
        }

        if self.state.is_empty() {
            let tab = Tab::new(self.policy.default_content.clone());
            let stored = self.repository.add(tab, true).await?;
            self.state.push(stored);
        }

        let persisted = self.repository.fetch_selected_id().await?;
        if self.state.index_of(persisted).is_some() {
            self.state.set_selected(persisted);
        } else if let Some(first) = self.state.get(0).cloned() {
            // stale or never-persisted selection: fall back to the first tab
            self.state.set_selected(first.id);
            self.repository.select(first).await?;
        }

        tracing::info!(
            count = self.state.len(),
            selected = %self.state.selected_id(),
            "hydrated tab store"
        );
        Ok(())
    }

    /// Tolerated-hydration fallback: make sure the list is non-empty and
    /// selected without touching the repository again.
    fn recover_unpersisted(&mut self) {
        if self.state.is_empty() {
            let tab = Tab::new(self.policy.default_content.clone());
            let id = tab.id;
            self.state.push(tab);
            self.state.set_selected(id);
        } else if self.state.selected_index().is_none() {
            let id = self.state.tabs()[0].id;
            self.state.set_selected(id);
        }
    }

    async fn execute(&mut self, command: Command) -> Result<Outcome> {
        match command {
            Command::GetCount => Ok(Outcome::Count(self.state.len())),
            Command::GetSelectedId => Ok(Outcome::SelectedId(self.state.selected_id())),
            Command::GetAll => Ok(Outcome::Tabs(self.state.snapshot())),
            Command::Add { tab } => self.add(tab).await,
            Command::Close { tab } => self.close(tab).await,
            Command::CloseById { id } => self.close_by_id(id).await,
            Command::CloseAll => self.close_all().await,
            Command::Select { tab } => self.select(tab).await,
            Command::ReplaceContent { content } => self.replace_content(content).await,
            Command::UpdatePreview { image } => self.update_preview(image),
        }
    }

    async fn add(&mut self, tab: Tab) -> Result<Outcome> {
        let index = match self.policy.add_position {
            AddPosition::ListEnd => self.state.len(),
            AddPosition::AfterSelected => self
                .state
                .selected_index()
                .map(|i| i + 1)
                .unwrap_or(self.state.len()),
        };
        let select = self.policy.make_active;

        let stored = self.repository.add(tab, select).await?;
        let index = self.state.insert(index, stored.clone());
        tracing::info!(tab_id = %stored.id, index, "added tab");

        match self.policy.add_speed {
            AddSpeed::Immediate => self.finish_add(stored.id, select),
            AddSpeed::After(delay) => {
                let tx = self.tx.clone();
                let id = stored.id;
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    // the store may have been discarded during the delay;
                    // if so, abandon the resumption silently
                    let Some(tx) = tx.upgrade() else { return };
                    let _ = tx.send(Envelope::FinishDeferredAdd { id, select }).await;
                });
            }
        }

        Ok(Outcome::Added { index })
    }

    /// Notify-and-select step of an add. Runs synchronously for immediate
    /// adds and as a deferred envelope for delayed ones.
    fn finish_add(&mut self, id: TabId, select: bool) {
        let Some(index) = self.state.index_of(id) else {
            // the tab can be closed during the delay
            tracing::warn!(tab_id = %id, "added tab vanished before its notify step");
            return;
        };
        let tab = self.state.tabs()[index].clone();

        self.registry.notify_tab_added(&tab, index);
        self.registry.notify_count_changed(self.state.len());
        if select {
            self.state.set_selected(id);
            self.registry.notify_tab_selected(index, &tab.content, id);
        }
    }

    async fn close(&mut self, tab: Tab) -> Result<Outcome> {
        let index = self
            .state
            .index_of(tab.id)
            .ok_or(TabError::ClosingNonexistentTab)?;
        let was_selected = self.state.selected_id() == tab.id;
        let was_only = self.state.len() == 1;

        // remove from the repository first; the in-memory removal follows
        // only on success
        let removed = self.repository.remove(vec![tab.clone()]).await?;
        if removed.is_empty() {
            tracing::warn!(tab_id = %tab.id, "repository had no row for closed tab");
        }
        self.state.remove(index);
        tracing::info!(tab_id = %tab.id, remaining = self.state.len(), "closed tab");

        if was_only {
            let default_tab = self.add_default_tab().await?;
            return Ok(Outcome::Closed {
                new_selected: Some(default_tab.id),
            });
        }

        self.registry.notify_count_changed(self.state.len());
        if !was_selected {
            return Ok(Outcome::Closed { new_selected: None });
        }

        // the strategy runs only because the selected tab went away; None
        // means it found no sensible neighbor, and the store falls back to
        // the front of the list
        let next_index = self
            .strategy
            .next_selected_index(self.state.tabs(), index)
            .unwrap_or(0);
        let next = self
            .state
            .get(next_index)
            .cloned()
            .ok_or(TabError::WrongTabIndex(next_index))?;

        self.state.set_selected(next.id);
        self.registry
            .notify_tab_selected(next_index, &next.content, next.id);
        // optimistic: the in-memory selection stands even if persisting it
        // fails below
        self.repository.select(next.clone()).await?;

        Ok(Outcome::Closed {
            new_selected: Some(next.id),
        })
    }

    async fn close_by_id(&mut self, id: TabId) -> Result<Outcome> {
        match self.state.find(id).cloned() {
            Some(tab) => self.close(tab).await,
            None => {
                tracing::debug!(tab_id = %id, "close_by_id target already absent");
                Ok(Outcome::AlreadyAbsent)
            }
        }
    }

    async fn close_all(&mut self) -> Result<Outcome> {
        let all = self.state.snapshot();
        self.repository.remove(all).await?;
        self.state.clear();

        let default_tab = self.add_default_tab().await?;
        tracing::info!(tab_id = %default_tab.id, "closed all tabs");
        Ok(Outcome::ClosedAll { default_tab })
    }

    /// Synthesizes, persists, and selects a default tab. This is the
    /// internal path used by `close`/`close_all` when the list would end up
    /// empty; it must never go back through the public channel.
    async fn add_default_tab(&mut self) -> Result<Tab> {
        let tab = Tab::new(self.policy.default_content.clone());
        let stored = self.repository.add(tab, true).await.map_err(|err| {
            tracing::error!(error = %err, "failed to persist default tab");
            TabError::FailToAddDefaultTab
        })?;

        let index = self.state.push(stored.clone());
        if self.state.get(index).is_none() {
            return Err(TabError::FailToFindNewSelected);
        }
        self.state.set_selected(stored.id);

        self.registry.notify_tab_added(&stored, index);
        self.registry.notify_count_changed(self.state.len());
        self.registry
            .notify_tab_selected(index, &stored.content, stored.id);

        tracing::info!(tab_id = %stored.id, "recreated default tab");
        Ok(stored)
    }

    async fn select(&mut self, tab: Tab) -> Result<Outcome> {
        if self.state.selected_id() == tab.id {
            return Ok(Outcome::Selected);
        }
        let index = self
            .state
            .index_of(tab.id)
            .ok_or(TabError::SelectedNotFound)?;

        let persisted = self.repository.select(tab.clone()).await?;
        if persisted != tab.id {
            tracing::warn!(expected = %tab.id, got = %persisted, "repository selected a different id");
        }
        self.state.set_selected(tab.id);

        let content = self.state.tabs()[index].content.clone();
        self.registry.notify_tab_selected(index, &content, tab.id);
        Ok(Outcome::Selected)
    }

    async fn replace_content(&mut self, content: ContentType) -> Result<Outcome> {
        if self.state.is_empty() {
            return Err(TabError::NoTabs);
        }
        if !self.state.is_initialized() {
            return Err(TabError::NotInitialized);
        }
        let index = self.state.selected_index().ok_or(TabError::SelectedNotFound)?;
        let current = &self.state.tabs()[index];
        if current.content == content {
            // equal content: no repository call, no notification
            return Err(TabError::ContentAlreadySet);
        }

        let replaced = current.with_content(content);
        let stored = self.repository.update(replaced).await?;
        self.state
            .replace(index, stored.clone())
            .ok_or(TabError::WrongTabIndex(index))?;

        tracing::debug!(tab_id = %stored.id, content = %stored.content, "replaced tab content");
        self.registry.notify_tab_replaced(&stored, index);
        Ok(Outcome::Replaced)
    }

    fn update_preview(&mut self, image: Option<Vec<u8>>) -> Result<Outcome> {
        if !self.state.is_initialized() {
            return Err(TabError::NotInitialized);
        }
        let index = self.state.selected_index().ok_or(TabError::SelectedNotFound)?;
        let Some(tab) = self.state.get_mut(index) else {
            return Err(TabError::WrongTabIndex(index));
        };

        // site tabs must carry a preview
        if tab.content.is_site() && image.is_none() {
            return Err(TabError::WrongTabContent);
        }

        tab.preview = image;
        let snapshot = tab.clone();
        self.registry.notify_tab_replaced(&snapshot, index);
        Ok(Outcome::PreviewUpdated)
    }

    fn attach(&mut self, observer: Arc<dyn TabObserver>, notify_immediately: bool) -> Subscription {
        let subscription = self.registry.attach(observer.clone());
        if notify_immediately {
            observer.count_changed(self.state.len());
            observer.initialize(self.state.snapshot());
            if let Some(index) = self.state.selected_index() {
                let tab = &self.state.tabs()[index];
                observer.tab_selected(index, tab.content.clone(), tab.id);
            }
        }
        subscription
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::NearbySelection;
    use crate::repository::{
        InMemoryTabRepository, RepositoryError, RepositoryResult, TabRepository,
    };
    use crate::tab::SitePage;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use url::Url;

    fn site(url: &str) -> ContentType {
        ContentType::Site(SitePage::new(Url::parse(url).unwrap()))
    }

    async fn spawn_default(repo: Arc<dyn TabRepository>) -> TabStateStore {
        TabStateStore::spawn(
            PositioningPolicy::default(),
            Arc::new(NearbySelection),
            repo,
            HydrationPolicy::Fatal,
        )
        .await
        .unwrap()
    }

    #[derive(Debug, Clone, PartialEq)]
    enum Event {
        Initialize(usize),
        Count(usize),
        Added(TabId, usize),
        Selected(usize, TabId),
        Replaced(TabId, usize),
    }

    #[derive(Default)]
    struct Recording {
        events: Mutex<Vec<Event>>,
    }

    impl Recording {
        fn events(&self) -> Vec<Event> {
            self.events.lock().clone()
        }
    }

    impl TabObserver for Recording {
        fn initialize(&self, tabs: Vec<Tab>) {
            self.events.lock().push(Event::Initialize(tabs.len()));
        }
        fn count_changed(&self, count: usize) {
            self.events.lock().push(Event::Count(count));
        }
        fn tab_added(&self, tab: Tab, index: usize) {
            self.events.lock().push(Event::Added(tab.id, index));
        }
        fn tab_selected(&self, index: usize, _content: ContentType, id: TabId) {
            self.events.lock().push(Event::Selected(index, id));
        }
        fn tab_replaced(&self, tab: Tab, index: usize) {
            self.events.lock().push(Event::Replaced(tab.id, index));
        }
    }

    /// Repository wrapper that fails selected operations on demand and
    /// counts calls per operation.
    struct Scripted {
        inner: InMemoryTabRepository,
        failing: Mutex<HashSet<&'static str>>,
        update_calls: AtomicUsize,
    }

    impl Scripted {
        fn new() -> Self {
            Self {
                inner: InMemoryTabRepository::new(),
                failing: Mutex::new(HashSet::new()),
                update_calls: AtomicUsize::new(0),
            }
        }

        fn fail(&self, op: &'static str) {
            self.failing.lock().insert(op);
        }

        fn check(&self, op: &'static str) -> RepositoryResult<()> {
            if self.failing.lock().contains(op) {
                Err(RepositoryError::msg(format!("injected {op} failure")))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl TabRepository for Scripted {
        async fn fetch_all(&self) -> RepositoryResult<Vec<Tab>> {
            self.check("fetch_all")?;
            self.inner.fetch_all().await
        }
        async fn fetch_selected_id(&self) -> RepositoryResult<TabId> {
            self.check("fetch_selected_id")?;
            self.inner.fetch_selected_id().await
        }
        async fn add(&self, tab: Tab, select: bool) -> RepositoryResult<Tab> {
            self.check("add")?;
            self.inner.add(tab, select).await
        }
        async fn update(&self, tab: Tab) -> RepositoryResult<Tab> {
            self.update_calls.fetch_add(1, Ordering::SeqCst);
            self.check("update")?;
            self.inner.update(tab).await
        }
        async fn remove(&self, tabs: Vec<Tab>) -> RepositoryResult<Vec<Tab>> {
            self.check("remove")?;
            self.inner.remove(tabs).await
        }
        async fn select(&self, tab: Tab) -> RepositoryResult<TabId> {
            self.check("select")?;
            self.inner.select(tab).await
        }
    }

    #[tokio::test]
    async fn test_hydration_from_empty_repository_creates_default_tab() {
        let repo = Arc::new(InMemoryTabRepository::new());
        let store = spawn_default(repo.clone()).await;

        assert_eq!(store.count().await.unwrap(), 1);
        let tabs = store.all().await.unwrap();
        assert_eq!(tabs[0].content, ContentType::Blank);
        assert_eq!(store.selected_id().await.unwrap(), tabs[0].id);

        // the synthesized tab was persisted, not just held in memory
        assert_eq!(repo.fetch_all().await.unwrap().len(), 1);
        assert_eq!(repo.fetch_selected_id().await.unwrap(), tabs[0].id);
    }

    #[tokio::test]
    async fn test_hydration_restores_persisted_order_and_selection() {
        let a = Tab::with_title(ContentType::Homepage, "a");
        let b = Tab::with_title(site("https://example.com"), "b");
        let repo = Arc::new(InMemoryTabRepository::seeded(vec![a.clone(), b.clone()]));
        repo.select(b.clone()).await.unwrap();

        let store = spawn_default(repo).await;
        let tabs = store.all().await.unwrap();
        assert_eq!(tabs[0].id, a.id);
        assert_eq!(tabs[1].id, b.id);
        assert_eq!(store.selected_id().await.unwrap(), b.id);
    }

    #[tokio::test]
    async fn test_hydration_failure_is_fatal_by_policy() {
        let repo = Arc::new(Scripted::new());
        repo.fail("fetch_all");
        let result = TabStateStore::spawn(
            PositioningPolicy::default(),
            Arc::new(NearbySelection),
            repo,
            HydrationPolicy::Fatal,
        )
        .await;
        assert!(matches!(result, Err(TabError::Repository(_))));
    }

    #[tokio::test]
    async fn test_hydration_failure_tolerated_by_policy() {
        let repo = Arc::new(Scripted::new());
        repo.fail("fetch_all");
        let store = TabStateStore::spawn(
            PositioningPolicy::default(),
            Arc::new(NearbySelection),
            repo,
            HydrationPolicy::Tolerate,
        )
        .await
        .unwrap();

        // memory-only default tab keeps the non-empty invariant alive
        assert_eq!(store.count().await.unwrap(), 1);
        let tabs = store.all().await.unwrap();
        assert_eq!(store.selected_id().await.unwrap(), tabs[0].id);
    }

    #[tokio::test]
    async fn test_add_list_end_appends() {
        let store = spawn_default(Arc::new(InMemoryTabRepository::new())).await;
        let tab = Tab::with_title(site("https://example.com"), "new");
        let index = store.add_tab(tab.clone()).await.unwrap();

        let tabs = store.all().await.unwrap();
        assert_eq!(index, tabs.len() - 1);
        assert_eq!(tabs[index].id, tab.id);
        // make_active defaults to true
        assert_eq!(store.selected_id().await.unwrap(), tab.id);
    }

    #[tokio::test]
    async fn test_add_after_selected_inserts_adjacent() {
        let policy = PositioningPolicy {
            add_position: AddPosition::AfterSelected,
            ..PositioningPolicy::default()
        };
        let store = TabStateStore::spawn(
            policy,
            Arc::new(NearbySelection),
            Arc::new(InMemoryTabRepository::new()),
            HydrationPolicy::Fatal,
        )
        .await
        .unwrap();

        // [a]; selected a; add b -> [a, b] with b at 1
        let b = Tab::with_title(ContentType::Homepage, "b");
        assert_eq!(store.add_tab(b.clone()).await.unwrap(), 1);
        // b is now selected; add c -> [a, b, c] with c at 2
        let c = Tab::with_title(ContentType::Favorites, "c");
        assert_eq!(store.add_tab(c.clone()).await.unwrap(), 2);

        let ids: Vec<TabId> = store.all().await.unwrap().iter().map(|t| t.id).collect();
        assert_eq!(ids[1], b.id);
        assert_eq!(ids[2], c.id);
    }

    #[tokio::test]
    async fn test_add_repository_failure_leaves_state_untouched() {
        let repo = Arc::new(Scripted::new());
        let store = spawn_default(repo.clone()).await;
        let before = store.all().await.unwrap();

        repo.fail("add");
        let err = store
            .add_tab(Tab::new(ContentType::Homepage))
            .await
            .unwrap_err();
        assert!(matches!(err, TabError::Repository(_)));
        assert_eq!(store.all().await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_close_unselected_keeps_selection() {
        let store = spawn_default(Arc::new(InMemoryTabRepository::new())).await;
        let default_tab = store.all().await.unwrap()[0].clone();
        let added = Tab::with_title(site("https://example.com"), "a");
        store.add_tab(added.clone()).await.unwrap();
        // selection moved to the added tab; close the original default
        let new_selected = store.close_tab(default_tab).await.unwrap();

        assert_eq!(new_selected, None);
        assert_eq!(store.count().await.unwrap(), 1);
        assert_eq!(store.selected_id().await.unwrap(), added.id);
    }

    #[tokio::test]
    async fn test_close_selected_consults_strategy_once() {
        struct CountingStrategy {
            calls: AtomicUsize,
        }
        impl SelectionStrategy for CountingStrategy {
            fn next_selected_index(&self, tabs: &[Tab], removed_index: usize) -> Option<usize> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                NearbySelection.next_selected_index(tabs, removed_index)
            }
        }

        let strategy = Arc::new(CountingStrategy {
            calls: AtomicUsize::new(0),
        });
        let store = TabStateStore::spawn(
            PositioningPolicy::default(),
            strategy.clone(),
            Arc::new(InMemoryTabRepository::new()),
            HydrationPolicy::Fatal,
        )
        .await
        .unwrap();

        let b = Tab::with_title(ContentType::Homepage, "b");
        let c = Tab::with_title(ContentType::Favorites, "c");
        store.add_tab(b.clone()).await.unwrap();
        store.add_tab(c.clone()).await.unwrap();
        // [default, b, c], selected c (last added). closing c: the new last
        // tab takes over per the nearby strategy.
        let new_selected = store.close_tab(c).await.unwrap();

        assert_eq!(strategy.calls.load(Ordering::SeqCst), 1);
        assert_eq!(new_selected, Some(b.id));
        assert_eq!(store.selected_id().await.unwrap(), b.id);
    }

    #[tokio::test]
    async fn test_close_selected_middle_prefers_next_sibling() {
        let store = spawn_default(Arc::new(InMemoryTabRepository::new())).await;
        let b = Tab::with_title(ContentType::Homepage, "b");
        let c = Tab::with_title(ContentType::Favorites, "c");
        store.add_tab(b.clone()).await.unwrap();
        store.add_tab(c.clone()).await.unwrap();
        store.select_tab(b.clone()).await.unwrap();

        // [default, b, c], selected b at index 1; c shifts into its slot
        let new_selected = store.close_tab(b).await.unwrap();
        assert_eq!(new_selected, Some(c.id));
        assert_eq!(store.selected_id().await.unwrap(), c.id);
    }

    #[tokio::test]
    async fn test_close_last_tab_recreates_default() {
        let repo = Arc::new(InMemoryTabRepository::new());
        let store = spawn_default(repo.clone()).await;
        let only = store.all().await.unwrap()[0].clone();

        let new_selected = store.close_tab(only.clone()).await.unwrap();
        let tabs = store.all().await.unwrap();
        assert_eq!(tabs.len(), 1);
        assert_ne!(tabs[0].id, only.id);
        assert_eq!(new_selected, Some(tabs[0].id));
        assert_eq!(store.selected_id().await.unwrap(), tabs[0].id);
        // the replacement reached the repository too
        assert_eq!(repo.fetch_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_close_unknown_tab_errors() {
        let store = spawn_default(Arc::new(InMemoryTabRepository::new())).await;
        let err = store
            .close_tab(Tab::new(ContentType::Homepage))
            .await
            .unwrap_err();
        assert!(matches!(err, TabError::ClosingNonexistentTab));
    }

    #[tokio::test]
    async fn test_close_by_id_absent_is_noop() {
        let store = spawn_default(Arc::new(InMemoryTabRepository::new())).await;
        let outcome = store
            .submit(Command::CloseById { id: TabId::new() })
            .await
            .into_result()
            .unwrap();
        assert_eq!(outcome, Outcome::AlreadyAbsent);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_close_by_id_delegates_to_close() {
        let store = spawn_default(Arc::new(InMemoryTabRepository::new())).await;
        let added = Tab::with_title(ContentType::Homepage, "a");
        store.add_tab(added.clone()).await.unwrap();

        store.close_tab_by_id(added.id).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 1);
        assert!(store
            .all()
            .await
            .unwrap()
            .iter()
            .all(|t| t.id != added.id));
    }

    #[tokio::test]
    async fn test_close_selected_persist_failure_is_optimistic() {
        let repo = Arc::new(Scripted::new());
        let store = spawn_default(repo.clone()).await;
        let b = Tab::with_title(ContentType::Homepage, "b");
        store.add_tab(b.clone()).await.unwrap();

        repo.fail("select");
        let err = store.close_tab(b).await.unwrap_err();
        assert!(matches!(err, TabError::Repository(_)));

        // the in-memory removal and reselection are not rolled back
        assert_eq!(store.count().await.unwrap(), 1);
        let remaining = store.all().await.unwrap();
        assert_eq!(store.selected_id().await.unwrap(), remaining[0].id);
    }

    #[tokio::test]
    async fn test_close_all_leaves_one_default_selected() {
        let repo = Arc::new(InMemoryTabRepository::new());
        let store = spawn_default(repo.clone()).await;
        for i in 0..3 {
            store
                .add_tab(Tab::with_title(ContentType::Homepage, format!("t{i}")))
                .await
                .unwrap();
        }

        let default_tab = store.close_all_tabs().await.unwrap();
        assert_eq!(store.count().await.unwrap(), 1);
        assert_eq!(store.selected_id().await.unwrap(), default_tab.id);
        assert_eq!(repo.fetch_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_spec_scenario_add_close_close_all() {
        // start with one default tab D
        let store = spawn_default(Arc::new(InMemoryTabRepository::new())).await;
        let d = store.all().await.unwrap()[0].clone();

        // add A at list end -> [D, A]
        let a = Tab::with_title(site("https://example.com"), "A");
        store.add_tab(a.clone()).await.unwrap();
        let ids: Vec<TabId> = store.all().await.unwrap().iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![d.id, a.id]);

        // close D (not selected) -> [A], selection unchanged
        assert_eq!(store.close_tab(d).await.unwrap(), None);
        assert_eq!(store.selected_id().await.unwrap(), a.id);

        // close all -> [new default], selected
        let fresh = store.close_all_tabs().await.unwrap();
        let tabs = store.all().await.unwrap();
        assert_eq!(tabs.len(), 1);
        assert_eq!(tabs[0].id, fresh.id);
        assert_eq!(store.selected_id().await.unwrap(), fresh.id);
    }

    #[tokio::test]
    async fn test_select_is_noop_when_already_selected() {
        let repo = Arc::new(Scripted::new());
        let store = spawn_default(repo.clone()).await;
        let selected = store.all().await.unwrap()[0].clone();

        repo.fail("select");
        // no repository call happens, so the injected failure never fires
        store.select_tab(selected).await.unwrap();
    }

    #[tokio::test]
    async fn test_select_persists_and_notifies() {
        let repo = Arc::new(InMemoryTabRepository::new());
        let store = spawn_default(repo.clone()).await;
        let first = store.all().await.unwrap()[0].clone();
        let b = Tab::with_title(ContentType::Homepage, "b");
        store.add_tab(b).await.unwrap();

        let observer = Arc::new(Recording::default());
        store
            .attach_observer(observer.clone(), false)
            .await
            .unwrap();

        store.select_tab(first.clone()).await.unwrap();
        assert_eq!(store.selected_id().await.unwrap(), first.id);
        assert_eq!(repo.fetch_selected_id().await.unwrap(), first.id);
        assert_eq!(observer.events(), vec![Event::Selected(0, first.id)]);
    }

    #[tokio::test]
    async fn test_select_unknown_tab_errors() {
        let store = spawn_default(Arc::new(InMemoryTabRepository::new())).await;
        let err = store
            .select_tab(Tab::new(ContentType::Homepage))
            .await
            .unwrap_err();
        assert!(matches!(err, TabError::SelectedNotFound));
    }

    #[tokio::test]
    async fn test_replace_content_equal_is_silent() {
        let repo = Arc::new(Scripted::new());
        let store = spawn_default(repo.clone()).await;
        let observer = Arc::new(Recording::default());
        store
            .attach_observer(observer.clone(), false)
            .await
            .unwrap();

        // the default tab already shows Blank
        let err = store.replace_content(ContentType::Blank).await.unwrap_err();
        assert!(matches!(err, TabError::ContentAlreadySet));
        assert_eq!(repo.update_calls.load(Ordering::SeqCst), 0);
        assert!(observer.events().is_empty());
    }

    #[tokio::test]
    async fn test_replace_content_updates_entry_and_clears_preview() {
        let repo = Arc::new(InMemoryTabRepository::new());
        let store = spawn_default(repo.clone()).await;
        store.update_preview(Some(vec![9, 9])).await.unwrap();

        let observer = Arc::new(Recording::default());
        store
            .attach_observer(observer.clone(), false)
            .await
            .unwrap();

        store
            .replace_content(site("https://example.com"))
            .await
            .unwrap();

        let tab = store.all().await.unwrap()[0].clone();
        assert!(tab.content.is_site());
        assert!(tab.preview.is_none());
        assert_eq!(observer.events(), vec![Event::Replaced(tab.id, 0)]);
        // persisted through the repository
        assert!(repo.fetch_all().await.unwrap()[0].content.is_site());
    }

    #[tokio::test]
    async fn test_update_preview_missing_image_on_site_tab() {
        let store = spawn_default(Arc::new(InMemoryTabRepository::new())).await;
        store
            .replace_content(site("https://example.com"))
            .await
            .unwrap();
        store.update_preview(Some(vec![1])).await.unwrap();

        let err = store.update_preview(None).await.unwrap_err();
        assert!(matches!(err, TabError::WrongTabContent));
        // state unchanged
        let tab = store.all().await.unwrap()[0].clone();
        assert_eq!(tab.preview, Some(vec![1]));
    }

    #[tokio::test]
    async fn test_update_preview_clears_on_non_site_tab() {
        let store = spawn_default(Arc::new(InMemoryTabRepository::new())).await;
        store.update_preview(Some(vec![1])).await.unwrap();
        store.update_preview(None).await.unwrap();
        assert!(store.all().await.unwrap()[0].preview.is_none());
    }

    #[tokio::test]
    async fn test_update_preview_before_initialization() {
        // the handlers are reachable directly for bootstrap-state checks
        let (tx, _rx) = mpsc::channel(1);
        let mut core = Core::new(
            PositioningPolicy::default(),
            Arc::new(NearbySelection),
            Arc::new(InMemoryTabRepository::new()),
            tx.downgrade(),
        );
        let err = core.update_preview(Some(vec![1])).unwrap_err();
        assert!(matches!(err, TabError::NotInitialized));
    }

    #[tokio::test]
    async fn test_attach_with_immediate_replay() {
        let store = spawn_default(Arc::new(InMemoryTabRepository::new())).await;
        let selected = store.selected_id().await.unwrap();

        let observer = Arc::new(Recording::default());
        store.attach_observer(observer.clone(), true).await.unwrap();

        assert_eq!(
            observer.events(),
            vec![
                Event::Count(1),
                Event::Initialize(1),
                Event::Selected(0, selected),
            ]
        );
    }

    #[tokio::test]
    async fn test_detached_observer_receives_nothing_more() {
        let store = spawn_default(Arc::new(InMemoryTabRepository::new())).await;
        let observer = Arc::new(Recording::default());
        let subscription = store
            .attach_observer(observer.clone(), false)
            .await
            .unwrap();

        store.detach_observer(subscription).await.unwrap();
        store
            .add_tab(Tab::with_title(ContentType::Homepage, "b"))
            .await
            .unwrap();
        assert!(observer.events().is_empty());
        assert_eq!(store.sweep_observers().await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deferred_add_notifies_and_selects_after_delay() {
        let policy = PositioningPolicy {
            add_speed: AddSpeed::After(Duration::from_millis(200)),
            ..PositioningPolicy::default()
        };
        let store = TabStateStore::spawn(
            policy,
            Arc::new(NearbySelection),
            Arc::new(InMemoryTabRepository::new()),
            HydrationPolicy::Fatal,
        )
        .await
        .unwrap();
        let original_selected = store.selected_id().await.unwrap();

        let observer = Arc::new(Recording::default());
        store
            .attach_observer(observer.clone(), false)
            .await
            .unwrap();

        let tab = Tab::with_title(ContentType::Homepage, "deferred");
        let index = store.add_tab(tab.clone()).await.unwrap();

        // inserted immediately, but not yet selected or announced
        assert_eq!(store.count().await.unwrap(), 2);
        assert_eq!(store.selected_id().await.unwrap(), original_selected);
        assert!(observer.events().is_empty());

        tokio::time::advance(Duration::from_millis(250)).await;
        tokio::task::yield_now().await;

        assert_eq!(store.selected_id().await.unwrap(), tab.id);
        assert_eq!(
            observer.events(),
            vec![
                Event::Added(tab.id, index),
                Event::Count(2),
                Event::Selected(index, tab.id),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_deferred_add_abandoned_when_store_dropped() {
        let policy = PositioningPolicy {
            add_speed: AddSpeed::After(Duration::from_millis(200)),
            ..PositioningPolicy::default()
        };
        let repo = Arc::new(InMemoryTabRepository::new());
        let store = TabStateStore::spawn(
            policy,
            Arc::new(NearbySelection),
            repo.clone(),
            HydrationPolicy::Fatal,
        )
        .await
        .unwrap();

        store
            .add_tab(Tab::with_title(ContentType::Homepage, "orphan"))
            .await
            .unwrap();
        drop(store);

        // past the delay: the sleeper finds the store gone and gives up
        tokio::time::advance(Duration::from_millis(250)).await;
        tokio::task::yield_now().await;

        // the tab itself was persisted before the store went away
        assert_eq!(repo.fetch_all().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_submissions_serialize() {
        let store = spawn_default(Arc::new(InMemoryTabRepository::new())).await;

        let mut handles = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .add_tab(Tab::with_title(ContentType::Homepage, format!("t{i}")))
                    .await
                    .unwrap();
                store.count().await.unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let tabs = store.all().await.unwrap();
        assert_eq!(tabs.len(), 17);
        let unique: HashSet<TabId> = tabs.iter().map(|t| t.id).collect();
        assert_eq!(unique.len(), tabs.len());
        // selection always references a live tab
        let selected = store.selected_id().await.unwrap();
        assert!(tabs.iter().any(|t| t.id == selected));
    }

    #[tokio::test]
    async fn test_invariants_hold_across_command_mix() {
        let store = spawn_default(Arc::new(InMemoryTabRepository::new())).await;

        for i in 0..4 {
            store
                .add_tab(Tab::with_title(ContentType::Homepage, format!("t{i}")))
                .await
                .unwrap();
        }
        let tabs = store.all().await.unwrap();
        store.close_tab(tabs[1].clone()).await.unwrap();
        store.close_tab(tabs[4].clone()).await.unwrap();
        store.select_tab(tabs[0].clone()).await.unwrap();
        store.close_tab(tabs[0].clone()).await.unwrap();
        store.close_all_tabs().await.unwrap();
        let only = store.all().await.unwrap()[0].clone();
        store.close_tab(only).await.unwrap();

        // after every storm: non-empty, selection live
        let tabs = store.all().await.unwrap();
        assert!(!tabs.is_empty());
        let selected = store.selected_id().await.unwrap();
        assert!(tabs.iter().any(|t| t.id == selected));
    }

    #[tokio::test]
    async fn test_submit_after_store_dropped() {
        let store = spawn_default(Arc::new(InMemoryTabRepository::new())).await;
        let clone = store.clone();
        drop(store);
        // the loop lives while any handle does
        assert_eq!(clone.count().await.unwrap(), 1);

        let orphan = {
            let (tx, _) = mpsc::channel(1);
            TabStateStore { tx }
        };
        let err = orphan.count().await.unwrap_err();
        assert!(matches!(err, TabError::StoreClosed));
    }
}
