//! Transaction table: paging, selection and pruning against live page data.

mod common;

use budget_core::{FetchError, PageRequest, Resource};
use budget_test_utils::{page_key, page_key_with, page_payload};
use common::{client, MockApi};
use budget_client::TransactionTable;

#[tokio::test(start_paused = true)]
async fn test_deleting_a_selected_row_prunes_it() {
    let api = MockApi::new();
    api.reads
        .reply(&page_key(0), Ok(page_payload(&[11, 12, 13, 14], 4)))
        .reply(&page_key(0), Ok(page_payload(&[11, 13, 14], 3)));
    let client = client(&api);
    let mut table = TransactionTable::new(client.clone());
    table.load().await;

    table.toggle(1, false);
    table.toggle(2, false);
    assert_eq!(table.selection().selected_ids(), vec![12, 13]);

    client.delete_transaction(12).await.unwrap();

    // The optimistic patch already removed the row from the cached page.
    let pruned = table.sync();
    assert_eq!(pruned, vec![12]);
    assert_eq!(table.selection().selected_ids(), vec![13]);
    assert_eq!(table.visible_ids(), &[11, 13, 14]);

    // The refetched page agrees; nothing further to prune.
    let snapshot = table.load().await;
    assert_eq!(snapshot.data().map(|p| p.total_elements), Some(3));
    assert_eq!(table.selection().selected_ids(), vec![13]);
}

#[tokio::test(start_paused = true)]
async fn test_changed_syncs_after_server_side_removal() {
    let api = MockApi::new();
    api.reads
        .reply(&page_key(0), Ok(page_payload(&[1, 2, 3], 3)))
        .reply(&page_key(0), Ok(page_payload(&[1, 3], 2)));
    let client = client(&api);
    let mut table = TransactionTable::new(client.clone());
    table.load().await;
    table.select_all();

    client
        .query_client()
        .refetch(&page_key(0))
        .settled()
        .await;
    let mut pruned = Vec::new();
    while pruned.is_empty() {
        pruned = table.changed().await.expect("handle alive");
    }
    assert_eq!(pruned, vec![2]);
    assert_eq!(table.selection().selected_ids(), vec![1, 3]);
}

#[tokio::test(start_paused = true)]
async fn test_selection_survives_paging() {
    let api = MockApi::new();
    api.reads
        .reply(&page_key(0), Ok(page_payload(&[1, 2, 3], 6)))
        .reply(&page_key(1), Ok(page_payload(&[4, 5, 6], 6)));
    let client = client(&api);
    let mut table = TransactionTable::new(client);
    table.load().await;
    table.toggle(0, false);

    table.set_page(1);
    assert!(table.selection().anchor().is_none());
    table.load().await;
    table.toggle(2, false);

    assert_eq!(table.selection().selected_ids(), vec![1, 6]);
}

#[tokio::test(start_paused = true)]
async fn test_sort_change_resets_to_first_page() {
    let api = MockApi::new();
    api.reads.respond(Resource::Transactions, page_payload(&[1, 2], 2));
    let client = client(&api);
    let mut table = TransactionTable::new(client);

    table.set_page(3);
    assert_eq!(table.page_request().page, 3);

    table.set_sort("amount,asc");
    assert_eq!(table.page_request(), &PageRequest::new(0, 20, "amount,asc"));
    table.load().await;
    assert_eq!(api.reads.calls(&page_key_with(table.page_request())), 1);

    table.set_page(2);
    table.set_page_size(50);
    assert_eq!(table.page_request(), &PageRequest::new(0, 50, "amount,asc"));
}

#[tokio::test(start_paused = true)]
async fn test_bulk_delete_clears_selection_only_on_success() {
    let api = MockApi::new();
    api.reads.respond(Resource::Transactions, page_payload(&[1, 2, 3, 4], 4));
    api.reply(
        "delete_transactions",
        Err(FetchError::Validation {
            status: 400,
            message: "Transaction 3 is locked".to_string(),
        }),
    );
    let client = client(&api);
    let mut table = TransactionTable::new(client);
    table.load().await;

    table.toggle(0, false);
    table.toggle(2, true);
    assert_eq!(table.selection().selected_ids(), vec![1, 2, 3]);

    let err = table.delete_selected().await.unwrap_err();
    assert!(err.to_string().contains("Transaction 3 is locked"));
    assert_eq!(table.selection().selected_ids(), vec![1, 2, 3]);
    assert_eq!(table.snapshot().data().map(|p| p.ids()), Some(vec![1, 2, 3, 4]));

    table.delete_selected().await.unwrap();
    assert!(table.selection().is_empty());
    assert_eq!(table.visible_ids(), &[4]);

    let calls = api.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1].1, serde_json::json!([1, 2, 3]));
}
