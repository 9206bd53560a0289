//! Controller behind the paginated transaction table.
//!
//! Owns the page request, the selection, and a mounted handle on the current
//! page. Whenever the page data changes the selection is pruned against it,
//! so a deleted row never stays selected.

use budget_core::{MutationError, PageRequest, Payload, TransactionId, TransactionPage};

use crate::api::BudgetApi;
use crate::client::BudgetClient;
use crate::queries::{QueryHandle, QuerySnapshot};
use crate::selection::SelectionState;

pub struct TransactionTable<A> {
    client: BudgetClient<A>,
    request: PageRequest,
    handle: QueryHandle<TransactionPage>,
    selection: SelectionState,
    /// Row ids of the page data last synced, in display order.
    visible: Vec<TransactionId>,
}

impl<A: BudgetApi + 'static> TransactionTable<A> {
    /// Open the client's default page. Must be called inside a tokio runtime.
    pub fn new(client: BudgetClient<A>) -> Self {
        let request = client.default_page().clone();
        let handle = client.transactions(&request);
        Self {
            client,
            request,
            handle,
            selection: SelectionState::new(),
            visible: Vec::new(),
        }
    }

    pub fn page_request(&self) -> &PageRequest {
        &self.request
    }

    pub fn selection(&self) -> &SelectionState {
        &self.selection
    }

    pub fn visible_ids(&self) -> &[TransactionId] {
        &self.visible
    }

    pub fn snapshot(&self) -> QuerySnapshot<TransactionPage> {
        self.handle.snapshot()
    }

    pub fn set_page(&mut self, page: u32) {
        if page != self.request.page {
            self.request.page = page;
            self.remount();
        }
    }

    /// Change the ordering. Goes back to the first page.
    pub fn set_sort(&mut self, sort: impl Into<String>) {
        let sort = sort.into();
        if sort != self.request.sort {
            self.request.sort = sort;
            self.request.page = 0;
            self.remount();
        }
    }

    /// Change the page size. Goes back to the first page.
    pub fn set_page_size(&mut self, size: u32) {
        if size != self.request.size {
            self.request.size = size;
            self.request.page = 0;
            self.remount();
        }
    }

    fn remount(&mut self) {
        self.handle = self.client.transactions(&self.request);
        // Rows of another page are not deletions; nothing to prune against.
        self.visible.clear();
        self.selection.reset_anchor();
    }

    /// Wait for the current page to load and sync the selection with it.
    pub async fn load(&mut self) -> QuerySnapshot<TransactionPage> {
        let snapshot = self.handle.read().await;
        self.apply(&snapshot);
        snapshot
    }

    /// Sync with whatever page data is cached right now.
    ///
    /// Returns the ids pruned from the selection.
    pub fn sync(&mut self) -> Vec<TransactionId> {
        let snapshot = self.handle.snapshot();
        self.apply(&snapshot)
    }

    /// Wait for the next change of the page data, then sync.
    pub async fn changed(&mut self) -> Option<Vec<TransactionId>> {
        if self.handle.changed().await {
            Some(self.sync())
        } else {
            None
        }
    }

    fn apply(&mut self, snapshot: &QuerySnapshot<TransactionPage>) -> Vec<TransactionId> {
        let Some(page) = snapshot.data() else {
            return Vec::new();
        };
        let current = page.ids();
        let pruned = self.selection.prune(&self.visible, &current);
        if !pruned.is_empty() {
            tracing::debug!(pruned = pruned.len(), "Pruned selection after page change");
        }
        self.visible = current;
        pruned
    }

    /// Click on the row at `index` of the visible page.
    pub fn toggle(&mut self, index: usize, shift_held: bool) {
        if let Some(id) = self.visible.get(index).copied() {
            self.selection.toggle(id, index, &self.visible, shift_held);
        }
    }

    pub fn select_all(&mut self) {
        self.selection.select_all(&self.visible);
    }

    pub fn clear_selection(&mut self) {
        self.selection.clear();
    }

    /// Delete every selected row. The selection is cleared on success and
    /// kept on failure.
    pub async fn delete_selected(&mut self) -> Result<Payload, MutationError> {
        let ids = self.selection.selected_ids();
        let response = self.client.delete_transactions(&ids).await?;
        self.selection.clear();
        self.sync();
        Ok(response)
    }
}

impl<A> std::fmt::Debug for TransactionTable<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionTable")
            .field("request", &self.request)
            .field("selection", &self.selection)
            .field("visible", &self.visible)
            .finish_non_exhaustive()
    }
}
