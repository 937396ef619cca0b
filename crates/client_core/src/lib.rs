//! Client-side plumbing for the HR service: HTTP transport, reactive paginated
//! data sources, session tracking and user notifications.

pub mod config;
pub mod data_source;
pub mod error;
pub mod filters;
pub mod normalize;
pub mod notifications;
pub mod payload;
pub mod session;
pub mod transport;

pub use config::{load_settings, load_settings_from, ClientSettings};
pub use data_source::{
    DataSourceConfig, DataSourceEvent, PaginatedDataSource, ResponseOrdering, ResultSet,
    RowTransform,
};
pub use error::{DataSourceError, FetchError};
pub use filters::{FilterSource, FilterStore};
pub use normalize::{normalize, NormalizedPage};
pub use notifications::{Notification, NotificationCenter, NotificationLevel};
pub use payload::{build_payload, page_count, ViewParameters};
pub use session::{
    Navigation, RouteGuard, RouteMeta, SessionClient, SessionError, SessionStore,
    DEFAULT_LOGIN_ROUTE,
};
pub use transport::{
    AuthSignal, AuthSignals, HttpTransport, MissingTransport, Transport, TransportError,
};
