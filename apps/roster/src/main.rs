use std::{path::PathBuf, sync::Arc};

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use client_core::{
    load_settings, load_settings_from, ClientSettings, DataSourceConfig, DataSourceEvent,
    FilterStore, HttpTransport, Navigation, NotificationCenter, PaginatedDataSource, RouteGuard,
    RouteMeta, SessionClient, SessionStore, Transport,
};
use serde_json::Value;
use shared::{
    domain::{AttendanceRow, DepartmentRow, EmployeeRow},
    protocol::{SortSpec, ATTENDANCE_LIST_PATH, DEPARTMENT_LIST_PATH, EMPLOYEE_LIST_PATH},
};
use tracing::info;

mod listing;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Entity {
    Employee,
    Department,
    Attendance,
}

#[derive(Parser, Debug)]
struct Args {
    /// Overrides the configured API base url.
    #[arg(long)]
    server_url: Option<String>,
    #[arg(long, value_enum, default_value = "employee")]
    entity: Entity,
    #[arg(long, default_value_t = 1)]
    page: u32,
    #[arg(long)]
    per_page: Option<u32>,
    #[arg(long)]
    sort: Vec<String>,
    #[arg(long)]
    desc: bool,
    /// key=value, repeatable.
    #[arg(long)]
    filter: Vec<String>,
    #[arg(long, requires = "password")]
    employee_id: Option<String>,
    #[arg(long, requires = "employee_id")]
    password: Option<String>,
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();
    let args = Args::parse();

    let mut settings = match &args.config {
        Some(path) => load_settings_from(path)?,
        None => load_settings(),
    };
    if let Some(url) = &args.server_url {
        settings.api_base_url = url.clone();
    }

    let notifications = NotificationCenter::new();
    let mut feed = notifications.subscribe();
    let printer = tokio::spawn(async move {
        while let Ok(notification) = feed.recv().await {
            eprintln!("[{}] {}", notification.level, notification.message);
        }
    });

    let outcome = run(&args, &settings, &notifications).await;
    drop(notifications);
    let _ = printer.await;
    outcome
}

async fn run(
    args: &Args,
    settings: &ClientSettings,
    notifications: &NotificationCenter,
) -> Result<()> {
    let http = Arc::new(HttpTransport::new(settings)?);
    let auth_signals = http.auth_signals();
    // One transport, so the login cookie rides along with the list queries.
    let transport: Arc<dyn Transport> = http;
    let session = SessionClient::new(transport.clone(), SessionStore::new());
    let _session_follower = session.store().follow(&auth_signals);

    if let (Some(employee_id), Some(password)) = (&args.employee_id, &args.password) {
        let user = session
            .login(employee_id, password)
            .await
            .context("login failed")?;
        notifications.success(format!("Signed in as {}", user.name));
    }

    let guard = RouteGuard::new(session.clone());
    if let Navigation::Redirect(route) = guard.authorize(&RouteMeta::protected()).await {
        notifications.error("Please sign in first");
        bail!("not signed in (redirected to {route})");
    }

    match args.entity {
        Entity::Employee => {
            list(
                transport,
                settings,
                args,
                EMPLOYEE_LIST_PATH,
                EmployeeRow::from_raw,
                listing::employee_line,
                notifications,
            )
            .await
        }
        Entity::Department => {
            list(
                transport,
                settings,
                args,
                DEPARTMENT_LIST_PATH,
                DepartmentRow::from_raw,
                listing::department_line,
                notifications,
            )
            .await
        }
        Entity::Attendance => {
            list(
                transport,
                settings,
                args,
                ATTENDANCE_LIST_PATH,
                AttendanceRow::from_raw,
                listing::attendance_line,
                notifications,
            )
            .await
        }
    }
}

async fn list<T: Clone + Send + Sync + 'static>(
    transport: Arc<dyn Transport>,
    settings: &ClientSettings,
    args: &Args,
    endpoint: &str,
    transform: fn(Value) -> T,
    render: fn(&T) -> String,
    notifications: &NotificationCenter,
) -> Result<()> {
    let filters = FilterStore::with_entries(listing::parse_filters(&args.filter)?);
    let config = DataSourceConfig::new(endpoint, transform)
        .with_settings(settings)
        .with_filters(filters);
    let source = PaginatedDataSource::new(transport, config)?;
    let mut events = source.events();

    let before = source.revision();
    let changed = source.update_view(|view| {
        view.page = args.page;
        if let Some(per_page) = args.per_page {
            view.items_per_page = per_page;
        }
        if !args.sort.is_empty() {
            view.sort_by = SortSpec::from(args.sort.clone());
        }
        view.sort_desc = args.desc;
    })?;
    if !changed {
        source.fetch_data().await;
    }
    let state = source.settled(before).await;

    let mut failed = false;
    while let Ok(event) = events.try_recv() {
        if let DataSourceEvent::FetchFailed {
            endpoint, message, ..
        } = event
        {
            notifications.error(format!("Failed to load {endpoint}: {message}"));
            failed = true;
        }
    }
    if failed {
        bail!("could not load {endpoint}");
    }

    for row in &state.items {
        println!("{}", render(row));
    }
    println!(
        "page {}/{} (total {})",
        source.page(),
        source.page_count(),
        state.total_count
    );
    info!(endpoint, rows = state.items.len(), "roster: listing done");
    Ok(())
}
