pub mod client;
pub mod http_client;
pub mod realtime;

pub use client::{SignUpResponse, SupabaseClient, TABLE_BOOKMARKS, TABLE_USER_PROFILES};
pub use http_client::{HttpClient, HttpMethod, HttpResponse, ReqwestHttpClient};
pub use realtime::RealtimeManager;
