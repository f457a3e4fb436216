//! Integration tests for the `SQLite` engine against real database files.

use std::sync::Arc;

use prekey_kv::{
    Condition, Item, ItemKey, KeyValueStore, Query, SqliteKeyValueStore, TransactWriteItem,
};

fn item(partition: u8, sort: &[u8], value: &[u8]) -> Item {
    Item {
        key: ItemKey::new(vec![partition], sort.to_vec()),
        value: value.to_vec(),
    }
}

// ── Persistence ─────────────────────────────────────────────────────

#[tokio::test]
async fn items_survive_reopen() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("keys.db");

    {
        let store = SqliteKeyValueStore::open(&path).unwrap();
        store.put_item("Keys", item(1, &[1, 0], b"a")).await.unwrap();
    }

    let store = SqliteKeyValueStore::open(&path).unwrap();
    let value = store
        .get_item("Keys", &ItemKey::new(vec![1], vec![1, 0]))
        .await
        .unwrap();
    assert_eq!(value, Some(b"a".to_vec()));
}

// ── Range reads ─────────────────────────────────────────────────────

#[tokio::test]
async fn query_and_count_honor_prefix() {
    let store = SqliteKeyValueStore::open_in_memory().unwrap();
    for sort in [[1, 1], [1, 2], [1, 3], [2, 1]] {
        store.put_item("Keys", item(5, &sort, b"x")).await.unwrap();
    }
    store.put_item("PqKeys", item(5, &[1, 9], b"x")).await.unwrap();

    assert_eq!(store.count("Keys", &[5], &[1]).await.unwrap(), 3);
    assert_eq!(store.count("Keys", &[5], &[]).await.unwrap(), 4);
    assert_eq!(store.count("Keys", &[6], &[]).await.unwrap(), 0);

    let first = store
        .query(Query::new("Keys", vec![5]).with_prefix(vec![1]).with_limit(2))
        .await
        .unwrap();
    let sorts: Vec<_> = first.items.iter().map(|i| i.key.sort.clone()).collect();
    assert_eq!(sorts, vec![vec![1, 1], vec![1, 2]]);
    assert_eq!(first.last_evaluated, Some(vec![1, 2]));

    let rest = store
        .query(
            Query::new("Keys", vec![5])
                .with_prefix(vec![1])
                .starting_after(first.last_evaluated),
        )
        .await
        .unwrap();
    assert_eq!(rest.items.len(), 1);
    assert_eq!(rest.last_evaluated, None);
}

// ── Transactions ────────────────────────────────────────────────────

#[tokio::test]
async fn transaction_rolls_back_on_conflict() {
    let store = SqliteKeyValueStore::open_in_memory().unwrap();
    store.put_item("Keys", item(1, &[1], b"old")).await.unwrap();

    let err = store
        .transact_write(vec![
            TransactWriteItem::DeletePrefix {
                table: "Keys".into(),
                partition: vec![1],
                sort_prefix: vec![],
            },
            TransactWriteItem::Put {
                table: "Keys".into(),
                item: item(1, &[2], b"new"),
            },
            TransactWriteItem::ConditionCheck {
                table: "Accounts".into(),
                key: ItemKey::new(vec![1], vec![]),
                condition: Condition::Exists,
            },
        ])
        .await
        .unwrap_err();
    assert!(err.is_transaction_conflict());

    assert_eq!(store.count("Keys", &[1], &[]).await.unwrap(), 1);
    let old = store
        .get_item("Keys", &ItemKey::new(vec![1], vec![1]))
        .await
        .unwrap();
    assert_eq!(old, Some(b"old".to_vec()));
}

#[tokio::test]
async fn transaction_replaces_prefix_atomically() {
    let store = SqliteKeyValueStore::open_in_memory().unwrap();
    store.put_item("Keys", item(1, &[1, 1], b"a")).await.unwrap();
    store.put_item("Keys", item(1, &[2, 1], b"other device")).await.unwrap();

    store
        .transact_write(vec![
            TransactWriteItem::DeletePrefix {
                table: "Keys".into(),
                partition: vec![1],
                sort_prefix: vec![1],
            },
            TransactWriteItem::Put {
                table: "Keys".into(),
                item: item(1, &[1, 2], b"b"),
            },
        ])
        .await
        .unwrap();

    let page = store.query(Query::new("Keys", vec![1])).await.unwrap();
    let values: Vec<_> = page.items.into_iter().map(|i| i.value).collect();
    assert_eq!(values, vec![b"b".to_vec(), b"other device".to_vec()]);
}

#[tokio::test]
async fn replace_prefix_swaps_large_range() {
    let store = SqliteKeyValueStore::open_in_memory().unwrap();
    store.put_item("Keys", item(1, &[1, 0, 0], b"stale")).await.unwrap();
    store.put_item("Keys", item(1, &[2, 0, 1], b"other device")).await.unwrap();

    let fresh: Vec<_> = (1..=250u16)
        .map(|i| {
            let [hi, lo] = i.to_be_bytes();
            item(1, &[1, hi, lo], b"fresh")
        })
        .collect();
    store.replace_prefix("Keys", &[1], &[1], fresh).await.unwrap();

    assert_eq!(store.count("Keys", &[1], &[1]).await.unwrap(), 250);
    assert_eq!(store.count("Keys", &[1], &[2]).await.unwrap(), 1);
    assert!(store
        .get_item("Keys", &ItemKey::new(vec![1], vec![1, 0, 0]))
        .await
        .unwrap()
        .is_none());
}

// ── Read-and-delete ─────────────────────────────────────────────────

#[tokio::test]
async fn concurrent_deletes_have_one_winner() {
    let dir = tempfile::TempDir::new().unwrap();
    let store = Arc::new(SqliteKeyValueStore::open(dir.path().join("keys.db")).unwrap());
    store.put_item("Keys", item(1, &[1], b"once")).await.unwrap();

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                store
                    .delete_item("Keys", &ItemKey::new(vec![1], vec![1]))
                    .await
                    .unwrap()
            })
        })
        .collect();

    let results = futures::future::join_all(tasks).await;
    let winners = results
        .into_iter()
        .filter(|r| r.as_ref().unwrap().is_some())
        .count();
    assert_eq!(winners, 1);
}
