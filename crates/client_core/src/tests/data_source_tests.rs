use super::*;
use crate::{
    filters::FilterStore,
    transport::{HttpTransport, TransportError},
};
use async_trait::async_trait;
use axum::{routing::post, Json, Router};
use futures::StreamExt;
use serde_json::json;
use shared::{
    domain::EmployeeRow,
    protocol::{FilterValue, LabeledOption, EMPLOYEE_LIST_PATH},
};
use std::{collections::VecDeque, sync::atomic::AtomicBool};
use tokio::{
    net::TcpListener,
    sync::{oneshot, Mutex},
};

type Responder = Box<dyn Fn(&Value) -> Result<Value, TransportError> + Send + Sync>;

struct TestTransport {
    requests: Mutex<Vec<(String, Value)>>,
    calls: watch::Sender<usize>,
    gates: Mutex<VecDeque<oneshot::Receiver<()>>>,
    respond: Responder,
}

impl TestTransport {
    fn responding(
        respond: impl Fn(&Value) -> Result<Value, TransportError> + Send + Sync + 'static,
    ) -> Self {
        let (calls, _) = watch::channel(0);
        Self {
            requests: Mutex::new(Vec::new()),
            calls,
            gates: Mutex::new(VecDeque::new()),
            respond: Box::new(respond),
        }
    }

    /// The first `count` calls each wait for their own release.
    fn gated(mut self, count: usize) -> (Self, Vec<oneshot::Sender<()>>) {
        let mut releases = Vec::with_capacity(count);
        let gates = self.gates.get_mut();
        for _ in 0..count {
            let (tx, rx) = oneshot::channel();
            releases.push(tx);
            gates.push_back(rx);
        }
        (self, releases)
    }

    async fn bodies(&self) -> Vec<Value> {
        self.requests
            .lock()
            .await
            .iter()
            .map(|(_, body)| body.clone())
            .collect()
    }

    async fn wait_for_calls(&self, count: usize) {
        let mut rx = self.calls.subscribe();
        rx.wait_for(|calls| *calls >= count).await.expect("calls");
    }

    fn call_count(&self) -> usize {
        *self.calls.borrow()
    }
}

#[async_trait]
impl Transport for TestTransport {
    async fn post_json(&self, path: &str, body: &Value) -> Result<Value, TransportError> {
        let gate = self.gates.lock().await.pop_front();
        self.requests
            .lock()
            .await
            .push((path.to_string(), body.clone()));
        self.calls.send_modify(|calls| *calls += 1);
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        (self.respond)(body)
    }

    async fn get_json(&self, _path: &str) -> Result<Value, TransportError> {
        Err(TransportError::Unavailable)
    }
}

fn page_echo(body: &Value) -> Result<Value, TransportError> {
    let page = body["page"].as_u64().unwrap_or_default();
    Ok(json!({ "data": [{ "page": page }], "meta": { "total": 100 } }))
}

fn network_failure(_body: &Value) -> Result<Value, TransportError> {
    Err(TransportError::Network {
        url: "http://hr.test/api/employee/GetData".into(),
        message: "connection refused".into(),
    })
}

fn source_over(
    transport: &Arc<TestTransport>,
    configure: impl FnOnce(DataSourceConfig<Value>) -> DataSourceConfig<Value>,
) -> PaginatedDataSource<Value> {
    let config = configure(DataSourceConfig::new(EMPLOYEE_LIST_PATH, |row| row));
    PaginatedDataSource::new(transport.clone(), config).expect("data source")
}

async fn let_driver_run() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn construction_does_not_fetch() {
    let transport = Arc::new(TestTransport::responding(page_echo));
    let source = source_over(&transport, |config| config);

    let_driver_run().await;
    assert_eq!(transport.call_count(), 0);
    assert_eq!(source.snapshot(), ResultSet::default());
}

#[tokio::test]
async fn fetch_data_commits_normalized_rows() {
    let transport = Arc::new(TestTransport::responding(page_echo));
    let source = source_over(&transport, |config| config);

    source.fetch_data().await;

    let state = source.snapshot();
    assert_eq!(state.items, vec![json!({ "page": 1 })]);
    assert_eq!(state.total_count, 100);
    assert!(!state.loading);
    assert_eq!(state.revision, 1);
    assert_eq!(source.page_count(), 10);

    let requests = transport.requests.lock().await;
    assert_eq!(requests[0].0, EMPLOYEE_LIST_PATH);
    assert_eq!(
        requests[0].1,
        json!({ "page": 1, "per_page": 10, "sort_by": [], "filter": {} })
    );
}

#[tokio::test]
async fn setters_in_one_batch_issue_a_single_request() {
    let transport = Arc::new(TestTransport::responding(page_echo));
    let source = source_over(&transport, |config| config);

    assert!(source.set_page(2).expect("page"));
    assert!(source.set_items_per_page(25).expect("per page"));
    assert!(source.set_sort_by("name").expect("sort"));
    assert!(source.set_sort_desc(true).expect("desc"));

    let state = source.settled(0).await;
    let_driver_run().await;

    assert_eq!(transport.call_count(), 1);
    assert_eq!(
        transport.bodies().await,
        vec![json!({ "page": 2, "per_page": 25, "sort_by": ["name"], "filter": {} })]
    );
    assert_eq!(state.items, vec![json!({ "page": 2 })]);
}

#[tokio::test]
async fn update_view_applies_changes_as_one() {
    let transport = Arc::new(TestTransport::responding(page_echo));
    let source = source_over(&transport, |config| config);

    let changed = source
        .update_view(|view| {
            view.page = 4;
            view.sort_by = SortSpec::from(vec!["employeeID", "name"]);
        })
        .expect("update");
    assert!(changed);

    source.settled(0).await;
    let_driver_run().await;
    assert_eq!(transport.call_count(), 1);
    assert_eq!(source.sort_by().keys(), vec!["employeeID", "name"]);
}

fn view_echo(body: &Value) -> Result<Value, TransportError> {
    Ok(json!({
        "data": [{ "page": body["page"], "per_page": body["per_page"], "sort_by": body["sort_by"] }],
        "meta": { "total": 1 }
    }))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn update_view_is_one_request_on_worker_threads() {
    let transport = Arc::new(TestTransport::responding(view_echo));
    let source = source_over(&transport, |config| config);

    for round in 0..50_u32 {
        let before = source.revision();
        source
            .update_view(|view| {
                view.page = round + 2;
                view.items_per_page = 10 + round % 3;
                view.sort_by = SortSpec::from(format!("col{round}"));
            })
            .expect("update");
        let state = source.settled(before).await;
        assert_eq!(
            state.items,
            vec![json!({
                "page": round + 2,
                "per_page": 10 + round % 3,
                "sort_by": [format!("col{round}")]
            })]
        );
    }

    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(transport.call_count(), 50);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn separate_setters_on_worker_threads_settle_on_the_final_view() {
    let transport = Arc::new(TestTransport::responding(view_echo));
    let source = source_over(&transport, |config| config);
    let mut results = source.subscribe();

    for round in 0..20_u32 {
        source.set_page(round + 2).expect("page");
        source.set_items_per_page(25 + round).expect("per page");
        source.set_sort_by(format!("col{round}")).expect("sort");

        let expected = vec![json!({
            "page": round + 2,
            "per_page": 25 + round,
            "sort_by": [format!("col{round}")]
        })];
        tokio::time::timeout(
            std::time::Duration::from_secs(5),
            results.wait_for(|state| state.items == expected && !state.loading),
        )
        .await
        .expect("settled in time")
        .expect("open");
    }
}

#[tokio::test]
async fn assigning_an_equal_value_does_not_refresh() {
    let transport = Arc::new(TestTransport::responding(page_echo));
    let source = source_over(&transport, |config| config);

    assert!(!source.set_page(1).expect("page"));
    assert!(!source.set_sort_desc(false).expect("desc"));

    let_driver_run().await;
    assert_eq!(transport.call_count(), 0);
}

#[tokio::test]
async fn invalid_parameters_are_rejected_without_refresh() {
    let transport = Arc::new(TestTransport::responding(page_echo));
    let source = source_over(&transport, |config| config);

    assert!(matches!(
        source.set_page(0),
        Err(DataSourceError::InvalidParameter { name: "page", .. })
    ));
    assert!(source
        .update_view(|view| {
            view.page = 3;
            view.items_per_page = 0;
        })
        .is_err());

    let_driver_run().await;
    assert_eq!(source.view(), ViewParameters::default());
    assert_eq!(transport.call_count(), 0);
}

#[tokio::test]
async fn zero_page_size_is_rejected_at_construction() {
    let transport: Arc<dyn Transport> = Arc::new(TestTransport::responding(page_echo));
    let config = DataSourceConfig::new(EMPLOYEE_LIST_PATH, |row| row).with_page_size(0);
    assert!(PaginatedDataSource::<Value>::new(transport, config).is_err());
}

#[tokio::test]
async fn filter_store_entry_change_triggers_one_refresh() {
    let transport = Arc::new(TestTransport::responding(page_echo));
    let store = FilterStore::new();
    let source = source_over(&transport, |config| config.with_filters(store.clone()));

    store.set("dept", LabeledOption::new("ENG", "Engineering"));
    source.settled(0).await;
    let_driver_run().await;

    assert_eq!(transport.call_count(), 1);
    assert_eq!(transport.bodies().await[0]["filter"], json!({ "dept": "ENG" }));

    // Same value again: nothing to do.
    store.set("dept", LabeledOption::new("ENG", "Engineering"));
    let_driver_run().await;
    assert_eq!(transport.call_count(), 1);

    store.remove("dept");
    source.settled(1).await;
    assert_eq!(transport.call_count(), 2);
    assert_eq!(transport.bodies().await[1]["filter"], json!({}));
}

#[tokio::test]
async fn filter_and_view_changes_in_one_batch_coalesce() {
    let transport = Arc::new(TestTransport::responding(page_echo));
    let store = FilterStore::new();
    let source = source_over(&transport, |config| config.with_filters(store.clone()));

    store.set("name.like", "ali");
    store.set("departmentName", FilterValue::from(LabeledOption::new("d1", "Finance")));
    source.set_page(3).expect("page");

    source.settled(0).await;
    let_driver_run().await;

    assert_eq!(transport.call_count(), 1);
    assert_eq!(
        transport.bodies().await[0],
        json!({
            "page": 3,
            "per_page": 10,
            "sort_by": [],
            "filter": { "departmentName": "d1", "name.like": "ali" }
        })
    );
}

#[tokio::test]
async fn provider_filters_are_read_at_fetch_time() {
    let transport = Arc::new(TestTransport::responding(page_echo));
    let status = Arc::new(std::sync::Mutex::new("present"));
    let current = Arc::clone(&status);
    let source = source_over(&transport, move |config| {
        config.with_filters(FilterSource::from_fn(move || {
            let value = *current.lock().expect("status");
            [("status".to_string(), FilterValue::from(value))]
                .into_iter()
                .collect()
        }))
    });

    source.fetch_data().await;
    *status.lock().expect("status") = "late";
    source.fetch_data().await;

    let bodies = transport.bodies().await;
    assert_eq!(bodies[0]["filter"]["status"], json!("present"));
    assert_eq!(bodies[1]["filter"]["status"], json!("late"));
}

#[tokio::test]
async fn network_failure_leaves_empty_idle_result() {
    let transport = Arc::new(TestTransport::responding(network_failure));
    let source = source_over(&transport, |config| config);
    let mut events = source.events();

    source.fetch_data().await;

    let state = source.snapshot();
    assert!(state.items.is_empty());
    assert_eq!(state.total_count, 0);
    assert!(!state.loading);

    match events.recv().await.expect("event") {
        DataSourceEvent::FetchFailed {
            endpoint, status, ..
        } => {
            assert_eq!(endpoint, EMPLOYEE_LIST_PATH);
            assert_eq!(status, None);
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn failure_after_success_resets_rows() {
    let failing = Arc::new(AtomicBool::new(false));
    let fail_now = Arc::clone(&failing);
    let transport = Arc::new(TestTransport::responding(move |body| {
        if fail_now.load(Ordering::SeqCst) {
            Err(TransportError::Unauthenticated {
                url: "http://hr.test/api/employee/GetData".into(),
            })
        } else {
            page_echo(body)
        }
    }));
    let source = source_over(&transport, |config| config);

    source.fetch_data().await;
    assert_eq!(source.items().len(), 1);

    failing.store(true, Ordering::SeqCst);
    source.fetch_data().await;

    let state = source.snapshot();
    assert!(state.items.is_empty());
    assert_eq!(state.total_count, 0);
    assert!(!state.loading);
    assert_eq!(state.revision, 2);
}

#[tokio::test]
async fn loading_is_set_only_while_request_is_in_flight() {
    let (transport, mut releases) = TestTransport::responding(page_echo).gated(1);
    let transport = Arc::new(transport);
    let source = source_over(&transport, |config| config);
    assert!(!source.loading());

    let task = tokio::spawn({
        let source = source.clone();
        async move { source.fetch_data().await }
    });
    transport.wait_for_calls(1).await;
    assert!(source.loading());
    assert_eq!(source.revision(), 0);

    releases.remove(0).send(()).expect("release");
    task.await.expect("refresh task");
    assert!(!source.loading());
    assert_eq!(source.revision(), 1);
}

#[tokio::test]
async fn loading_clears_after_in_flight_failure() {
    let (transport, mut releases) = TestTransport::responding(network_failure).gated(1);
    let transport = Arc::new(transport);
    let source = source_over(&transport, |config| config);

    let task = tokio::spawn({
        let source = source.clone();
        async move { source.fetch_data().await }
    });
    transport.wait_for_calls(1).await;
    assert!(source.loading());

    releases.remove(0).send(()).expect("release");
    task.await.expect("refresh task");
    assert!(!source.loading());
    assert!(source.items().is_empty());
}

#[tokio::test]
async fn dropped_refresh_still_clears_loading() {
    let (transport, _releases) = TestTransport::responding(page_echo).gated(1);
    let transport = Arc::new(transport);
    let source = source_over(&transport, |config| config);

    let task = tokio::spawn({
        let source = source.clone();
        async move { source.fetch_data().await }
    });
    transport.wait_for_calls(1).await;
    assert!(source.loading());

    task.abort();
    let _ = task.await;
    assert!(!source.loading());
    assert_eq!(source.revision(), 0);
}

#[tokio::test]
async fn repeated_refresh_with_stable_backend_is_idempotent() {
    let transport = Arc::new(TestTransport::responding(page_echo));
    let source = source_over(&transport, |config| config);

    source.fetch_data().await;
    let first = source.snapshot();
    source.fetch_data().await;
    let second = source.snapshot();

    assert_eq!(first.items, second.items);
    assert_eq!(first.total_count, second.total_count);
    assert_eq!(second.revision, first.revision + 1);
}

async fn run_out_of_order(ordering: ResponseOrdering) -> ResultSet<Value> {
    let (transport, mut releases) = TestTransport::responding(page_echo).gated(2);
    let transport = Arc::new(transport);
    let source = source_over(&transport, |config| config.with_ordering(ordering));

    source.set_page(2).expect("page");
    transport.wait_for_calls(1).await;
    source.set_page(3).expect("page");
    transport.wait_for_calls(2).await;

    let older = releases.remove(0);
    let newer = releases.remove(0);

    newer.send(()).expect("release newer");
    let mut results = source.subscribe();
    results
        .wait_for(|state| state.revision >= 1)
        .await
        .expect("first commit");

    older.send(()).expect("release older");
    source.settled(0).await
}

#[tokio::test]
async fn stale_response_is_discarded_by_default() {
    let state = run_out_of_order(ResponseOrdering::LatestIssuedWins).await;
    assert_eq!(state.items, vec![json!({ "page": 3 })]);
    assert_eq!(state.revision, 1);
    assert!(!state.loading);
}

#[tokio::test]
async fn last_resolved_response_wins_when_configured() {
    let state = run_out_of_order(ResponseOrdering::LastResolvedWins).await;
    assert_eq!(state.items, vec![json!({ "page": 2 })]);
    assert_eq!(state.revision, 2);
    assert!(!state.loading);
}

#[tokio::test]
async fn stream_yields_current_state_then_commits() {
    let transport = Arc::new(TestTransport::responding(page_echo));
    let source = source_over(&transport, |config| config);
    let mut stream = source.stream();

    let initial = stream.next().await.expect("initial");
    assert_eq!(initial.revision, 0);

    source.set_page(5).expect("page");
    loop {
        let state = stream.next().await.expect("state");
        if state.revision == 1 && !state.loading {
            assert_eq!(state.items, vec![json!({ "page": 5 })]);
            break;
        }
    }
}

#[tokio::test]
async fn dropping_every_handle_stops_reacting_to_filters() {
    let transport = Arc::new(TestTransport::responding(page_echo));
    let store = FilterStore::new();
    let source = source_over(&transport, |config| config.with_filters(store.clone()));
    drop(source);

    store.set("dept", "ENG");
    let_driver_run().await;
    assert_eq!(transport.call_count(), 0);
}

#[test]
fn response_ordering_parses_config_spellings() {
    assert_eq!(
        "latest_issued".parse::<ResponseOrdering>(),
        Ok(ResponseOrdering::LatestIssuedWins)
    );
    assert_eq!(
        " Last_Resolved_Wins ".parse::<ResponseOrdering>(),
        Ok(ResponseOrdering::LastResolvedWins)
    );
    assert!("newest".parse::<ResponseOrdering>().is_err());
}

async fn handle_employee_query(Json(body): Json<Value>) -> Json<Value> {
    let dept = body["filter"]["dept"].clone();
    Json(json!({
        "data": [
            { "id": 1, "employeeID": "EMP001", "departementName": dept, "name": "Alice", "address": "Bandung" },
            { "id": 2, "employeeID": "EMP002", "departementName": dept, "name": "Budi", "address": "Depok" }
        ],
        "meta": { "total": 31, "page": body["page"], "per_page": body["per_page"], "total_pages": 4 }
    }))
}

#[tokio::test]
async fn syncs_employee_rows_over_http() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let app = Router::new().route(EMPLOYEE_LIST_PATH, post(handle_employee_query));
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    let settings = ClientSettings {
        api_base_url: format!("http://{addr}"),
        ..ClientSettings::default()
    };
    let transport = Arc::new(HttpTransport::new(&settings).expect("transport"));
    let store = FilterStore::new();
    let source = PaginatedDataSource::new(
        transport,
        DataSourceConfig::new(EMPLOYEE_LIST_PATH, EmployeeRow::from_raw)
            .with_settings(&settings)
            .with_filters(store.clone()),
    )
    .expect("data source");

    store.set("dept", LabeledOption::new("ENG", "Engineering"));
    let state = source.settled(0).await;

    assert_eq!(state.total_count, 31);
    assert_eq!(source.page_count(), 4);
    let names: Vec<String> = state.items.iter().map(EmployeeRow::display_name).collect();
    assert_eq!(names, vec!["EMP001 - Alice", "EMP002 - Budi"]);
    assert_eq!(state.items[0].id.0, "1");
    assert_eq!(state.items[0].department_name, "ENG");
}
