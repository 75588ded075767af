// tests/store_test.rs — Integration test: SQLite round-trip (store CRUD)

use dostt::storage::schema;
use dostt::storage::store::{NewCall, NewTransaction, Store};
use pretty_assertions::assert_eq;
use rusqlite::Connection;

/// Create an in-memory SQLite store with schema applied.
fn test_store() -> Store {
    let conn = Connection::open_in_memory().unwrap();
    conn.execute_batch("PRAGMA foreign_keys=ON;").unwrap();
    schema::run_migrations(&conn).unwrap();
    Store::new(conn)
}

#[test]
fn test_login_and_balance_update() {
    let store = test_store();

    let user = store.login_or_create("meher", 750).unwrap();
    assert_eq!(user.coins, 750);

    let updated = store.update_user_coins(user.id, 90).unwrap().unwrap();
    assert_eq!(updated.coins, 90);

    let (coins,): (i64,) = store
        .conn()
        .query_row("SELECT coins FROM users WHERE id = ?1", [user.id], |row| {
            Ok((row.get(0)?,))
        })
        .unwrap();
    assert_eq!(coins, 90);
}

#[test]
fn test_usernames_are_unique() {
    let store = test_store();
    store.create_user("dup", 750).unwrap();
    assert!(store.create_user("dup", 10).is_err());
}

#[test]
fn test_call_history_newest_first() {
    let store = test_store();
    let user = store.login_or_create("tara", 750).unwrap();

    for (start, duration) in [
        ("2024-03-01T10:00:00+00:00", 30),
        ("2024-03-02T10:00:00+00:00", 60),
    ] {
        store
            .insert_call(&NewCall {
                user_id: user.id,
                companion_id: 1,
                start_time: Some(start.into()),
                duration,
                call_type: "audio".into(),
                coins_spent: duration / 6,
            })
            .unwrap();
    }

    let calls = store.calls_by_user(user.id).unwrap();
    let durations: Vec<i64> = calls.iter().map(|c| c.duration).collect();
    assert_eq!(durations, vec![60, 30]);
    assert_eq!(calls[0].coins_spent, 10);
}

#[test]
fn test_call_rejects_unknown_companion() {
    let store = test_store();
    let user = store.login_or_create("tara", 750).unwrap();
    let result = store.insert_call(&NewCall {
        user_id: user.id,
        companion_id: 999,
        start_time: None,
        duration: 5,
        call_type: "video".into(),
        coins_spent: 5,
    });
    assert!(result.is_err());
}

#[test]
fn test_call_rejects_unknown_kind() {
    let store = test_store();
    let user = store.login_or_create("tara", 750).unwrap();
    let result = store.insert_call(&NewCall {
        user_id: user.id,
        companion_id: 1,
        start_time: None,
        duration: 5,
        call_type: "hologram".into(),
        coins_spent: 5,
    });
    assert!(result.is_err());
}

#[test]
fn test_transactions_do_not_touch_balance() {
    let store = test_store();
    let user = store.login_or_create("isha", 750).unwrap();

    let entry = store
        .insert_transaction(&NewTransaction {
            user_id: user.id,
            amount: 400,
            coins: 500,
            payment_method: Some("upi".into()),
        })
        .unwrap();
    assert_eq!(entry.payment_method, "upi");

    assert_eq!(store.get_user(user.id).unwrap().unwrap().coins, 750);
    assert_eq!(store.transactions_by_user(user.id).unwrap(), vec![entry]);
}

#[test]
fn test_file_database_persists_across_opens() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dostt.db");

    let id = {
        let store = dostt::storage::open(&path).unwrap();
        store.login_or_create("neel", 750).unwrap().id
    };

    let store = dostt::storage::open(&path).unwrap();
    let user = store.get_user(id).unwrap().unwrap();
    assert_eq!(user.username, "neel");
    assert_eq!(store.list_companions().unwrap().len(), 8);
}
