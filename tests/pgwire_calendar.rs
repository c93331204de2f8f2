use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_postgres::error::SqlState;
use tokio_postgres::{Config, NoTls, SimpleQueryMessage};
use ulid::Ulid;

use roomcal::tenant::TenantManager;
use roomcal::wire;

// ── Test infrastructure ──────────────────────────────────────

async fn start_test_server() -> (SocketAddr, Arc<TenantManager>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("roomcal_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let tm = Arc::new(TenantManager::new(dir, 1000));

    let tm2 = tm.clone();
    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let tm = tm2.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, tm, "roomcal".to_string(), None).await;
            });
        }
    });

    (addr, tm)
}

async fn connect(addr: SocketAddr) -> tokio_postgres::Client {
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname("test")
        .user("roomcal")
        .password("roomcal");

    let (client, connection) = config.connect(NoTls).await.unwrap();
    tokio::spawn(async move {
        let _ = connection.await;
    });
    client
}

/// Data rows of a simple query, each as its text columns.
async fn rows(client: &tokio_postgres::Client, sql: &str) -> Vec<Vec<Option<String>>> {
    client
        .simple_query(sql)
        .await
        .unwrap()
        .into_iter()
        .filter_map(|msg| match msg {
            SimpleQueryMessage::Row(row) => Some(
                (0..row.len())
                    .map(|i| row.get(i).map(str::to_string))
                    .collect(),
            ),
            _ => None,
        })
        .collect()
}

/// Single-column result as strings.
async fn column(client: &tokio_postgres::Client, sql: &str) -> Vec<String> {
    rows(client, sql)
        .await
        .into_iter()
        .map(|r| r[0].clone().unwrap_or_default())
        .collect()
}

async fn create_unit(client: &tokio_postgres::Client, default_state: i64) -> Ulid {
    let id = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO units (id, default_state, name) VALUES ('{id}', {default_state}, 'Room {id}')"
        ))
        .await
        .unwrap();
    id
}

fn states_query(unit: Ulid, start: &str, end: &str) -> String {
    format!("SELECT * FROM states WHERE unit_id = '{unit}' AND start_date >= '{start}' AND end_date <= '{end}'")
}

fn is_true(v: &str) -> bool {
    matches!(v, "t" | "true")
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn create_and_list_units() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr).await;

    let unit = create_unit(&client, 3).await;

    let units = rows(&client, "SELECT * FROM units").await;
    assert_eq!(units.len(), 1);
    assert_eq!(units[0][0].as_deref(), Some(unit.to_string().as_str()));
    assert_eq!(units[0][1], Some(format!("Room {unit}")));
    assert_eq!(units[0][2].as_deref(), Some("3"));

    client
        .batch_execute(&format!("DELETE FROM units WHERE id = '{unit}'"))
        .await
        .unwrap();
    assert!(rows(&client, "SELECT * FROM units").await.is_empty());
}

#[tokio::test]
async fn select_one_unit_by_id() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr).await;

    let unit = create_unit(&client, 4).await;
    create_unit(&client, 0).await;

    let found = rows(&client, &format!("SELECT * FROM units WHERE id = '{unit}'")).await;
    assert_eq!(found.len(), 1);
    assert_eq!(found[0][0].as_deref(), Some(unit.to_string().as_str()));
    assert_eq!(found[0][2].as_deref(), Some("4"));

    let err = client
        .simple_query(&format!("SELECT * FROM units WHERE id = '{}'", Ulid::new()))
        .await
        .err()
        .unwrap();
    assert_eq!(err.code(), Some(&SqlState::RAISE_EXCEPTION));
}

#[tokio::test]
async fn insert_events_and_read_runs() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr).await;
    let unit = create_unit(&client, 0).await;

    let outcomes = rows(
        &client,
        &format!(
            "INSERT INTO events (id, unit_id, state, start_date, end_date) VALUES \
             (NULL, '{unit}', 42, '2024-03-10', '2024-03-15')"
        ),
    )
    .await;
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0][1].as_deref(), Some(unit.to_string().as_str()));
    assert_eq!(outcomes[0][2].as_deref(), Some("updated"));

    let events = rows(
        &client,
        &format!(
            "SELECT * FROM events WHERE unit_id = '{unit}' AND start_date >= '2024-03-01' AND end_date <= '2024-03-31'"
        ),
    )
    .await;
    let runs: Vec<(&str, &str, &str)> = events
        .iter()
        .map(|r| {
            (
                r[2].as_deref().unwrap(),
                r[3].as_deref().unwrap(),
                r[4].as_deref().unwrap(),
            )
        })
        .collect();
    assert_eq!(
        runs,
        vec![
            ("0", "2024-03-01", "2024-03-09"),
            ("42", "2024-03-10", "2024-03-15"),
            ("0", "2024-03-16", "2024-03-31"),
        ]
    );
}

#[tokio::test]
async fn events_across_months_and_units() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr).await;
    let a = create_unit(&client, 0).await;
    let b = create_unit(&client, 1).await;

    let outcomes = rows(
        &client,
        &format!(
            "INSERT INTO events (id, unit_id, state, start_date, end_date) VALUES \
             (NULL, '{a}', 20, '2024-01-30', '2024-02-02'), \
             (NULL, '{b}', 21, '2024-02-28', '2024-03-01')"
        ),
    )
    .await;
    assert_eq!(outcomes.len(), 2);
    assert!(outcomes.iter().all(|r| r[2].as_deref() == Some("updated")));

    let mut states = column(&client, &states_query(a, "2024-01-01", "2024-02-29")).await;
    states.sort();
    assert_eq!(states, vec!["0", "20"]);

    let states = column(&client, &states_query(b, "2024-02-29", "2024-02-29")).await;
    assert_eq!(states, vec!["21"]);
}

#[tokio::test]
async fn lock_blocks_other_states() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr).await;
    let unit = create_unit(&client, 0).await;

    client
        .batch_execute(&format!(
            "INSERT INTO events (id, unit_id, state, start_date, end_date) VALUES (NULL, '{unit}', 42, '2024-03-10', '2024-03-15')"
        ))
        .await
        .unwrap();
    client
        .batch_execute(&format!("INSERT INTO locks (unit_id, state) VALUES ('{unit}', 42)"))
        .await
        .unwrap();

    let outcomes = rows(
        &client,
        &format!(
            "INSERT INTO events (id, unit_id, state, start_date, end_date) VALUES (NULL, '{unit}', 7, '2024-03-12', '2024-03-20')"
        ),
    )
    .await;
    assert_eq!(outcomes[0][2].as_deref(), Some("blocked"));

    client
        .batch_execute(&format!("DELETE FROM locks WHERE unit_id = '{unit}' AND state = 42"))
        .await
        .unwrap();
    let outcomes = rows(
        &client,
        &format!(
            "INSERT INTO events (id, unit_id, state, start_date, end_date) VALUES (NULL, '{unit}', 7, '2024-03-12', '2024-03-20')"
        ),
    )
    .await;
    assert_eq!(outcomes[0][2].as_deref(), Some("updated"));
}

#[tokio::test]
async fn availability_against_accepted_states() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr).await;
    let unit = create_unit(&client, 0).await;

    client
        .batch_execute(&format!(
            "INSERT INTO events (id, unit_id, state, start_date, end_date) VALUES (NULL, '{unit}', 42, '2024-03-10', '2024-03-15')"
        ))
        .await
        .unwrap();

    let query = |accepted: &str| {
        format!(
            "SELECT * FROM availability WHERE unit_id = '{unit}' AND start_date >= '2024-03-01' \
             AND end_date <= '2024-03-31' AND state IN ({accepted})"
        )
    };

    let row = rows(&client, &query("0")).await;
    assert!(!is_true(row[0][1].as_deref().unwrap()));
    let row = rows(&client, &query("0, 42")).await;
    assert!(is_true(row[0][1].as_deref().unwrap()));
}

#[tokio::test]
async fn tentative_states_collapse_unless_confirmed() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr).await;
    let unit = create_unit(&client, 0).await;

    client
        .batch_execute(&format!(
            "INSERT INTO events (id, unit_id, state, start_date, end_date) VALUES \
             (NULL, '{unit}', -12, '2024-05-01', '2024-05-02'), \
             (NULL, '{unit}', -13, '2024-05-04', '2024-05-05')"
        ))
        .await
        .unwrap();

    let collapsed = column(&client, &states_query(unit, "2024-05-01", "2024-05-05")).await;
    assert_eq!(collapsed, vec!["-1", "0"]);

    let raw = column(
        &client,
        &format!("{} AND confirmed = true", states_query(unit, "2024-05-01", "2024-05-05")),
    )
    .await;
    assert_eq!(raw, vec!["-13", "-12", "0"]);
}

#[tokio::test]
async fn booking_lifecycle_over_sql() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr).await;
    let unit = create_unit(&client, 0).await;

    let saved = rows(
        &client,
        &format!(
            "INSERT INTO bookings (id, unit_id, start_date, end_date) VALUES (1, '{unit}', '2024-08-01', '2024-08-07')"
        ),
    )
    .await;
    assert_eq!(saved[0][0].as_deref(), Some("1"));
    assert_eq!(saved[0][2].as_deref(), Some("updated"));

    let states = column(&client, &states_query(unit, "2024-08-01", "2024-08-07")).await;
    assert_eq!(states, vec!["12"]);

    // The booking's state is locked: painting over it is refused.
    let outcomes = rows(
        &client,
        &format!(
            "INSERT INTO events (id, unit_id, state, start_date, end_date) VALUES (NULL, '{unit}', 0, '2024-08-03', '2024-08-04')"
        ),
    )
    .await;
    assert_eq!(outcomes[0][2].as_deref(), Some("blocked"));

    let deleted = rows(
        &client,
        &format!(
            "DELETE FROM bookings WHERE id = 1 AND unit_id = '{unit}' AND start_date = '2024-08-01' AND end_date = '2024-08-07'"
        ),
    )
    .await;
    assert_eq!(deleted[0][2].as_deref(), Some("updated"));

    let states = column(&client, &states_query(unit, "2024-08-01", "2024-08-07")).await;
    assert_eq!(states, vec!["0"]);
}

#[tokio::test]
async fn delete_events_resets_to_default() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr).await;
    let unit = create_unit(&client, 5).await;

    client
        .batch_execute(&format!(
            "INSERT INTO events (id, unit_id, state, start_date, end_date) VALUES (NULL, '{unit}', 30, '2024-12-30', '2025-01-02')"
        ))
        .await
        .unwrap();
    let removed = client
        .execute(
            &format!(
                "DELETE FROM events WHERE unit_id = '{unit}' AND state = 30 AND start_date = '2024-12-30' AND end_date = '2025-01-02'"
            ),
            &[],
        )
        .await
        .unwrap();
    assert_eq!(removed, 1);

    let states = column(&client, &states_query(unit, "2024-12-01", "2025-01-31")).await;
    assert_eq!(states, vec!["5"]);
}

#[tokio::test]
async fn extended_protocol_parameters() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr).await;
    let unit = create_unit(&client, 0).await;
    let unit_str = unit.to_string();

    let n = client
        .execute(
            "INSERT INTO locks (unit_id, state) VALUES ($1, $2)",
            &[&unit_str.as_str(), &"42"],
        )
        .await
        .unwrap();
    assert_eq!(n, 1);

    let n = client
        .execute(
            "DELETE FROM locks WHERE unit_id = $1 AND state = $2",
            &[&unit_str.as_str(), &"42"],
        )
        .await
        .unwrap();
    assert_eq!(n, 1);
}

#[tokio::test]
async fn errors_carry_sqlstate() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr).await;

    let err = client
        .batch_execute("INSERT INTO nowhere (id) VALUES ('x')")
        .await
        .unwrap_err();
    assert_eq!(err.code(), Some(&SqlState::SYNTAX_ERROR));

    let missing = Ulid::new();
    let err = client
        .batch_execute(&states_query(missing, "2024-01-01", "2024-01-31"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Some(&SqlState::RAISE_EXCEPTION));

    let unit = create_unit(&client, 0).await;
    let err = client
        .batch_execute(&states_query(unit, "2024-02-01", "2024-01-01"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Some(&SqlState::RAISE_EXCEPTION));
}

#[tokio::test]
async fn tenants_are_isolated_by_database() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr).await;
    create_unit(&client, 0).await;

    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname("other")
        .user("roomcal")
        .password("roomcal");
    let (other, connection) = config.connect(NoTls).await.unwrap();
    tokio::spawn(async move {
        let _ = connection.await;
    });

    assert!(rows(&other, "SELECT * FROM units").await.is_empty());
    assert_eq!(rows(&client, "SELECT * FROM units").await.len(), 1);
}

#[tokio::test]
async fn wrong_password_is_rejected() {
    let (addr, _tm) = start_test_server().await;
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname("test")
        .user("roomcal")
        .password("nope");
    assert!(config.connect(NoTls).await.is_err());
}
