pub mod backoff;
pub mod emulator;
pub mod session;

pub use backoff::Backoff;
pub use emulator::{ApiRoot, Service, api_root};
pub use session::{
    AsyncSession, BlockingSession, HttpRequest, HttpResponse, Method, Session, SessionKind,
    build_session,
};
