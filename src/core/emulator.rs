//! API root resolution with emulator overrides.
//!
//! Local emulators are selected through `*_EMULATOR_HOST` environment
//! variables. When one is set the API root points at the emulator over plain
//! HTTP and requests are sent without authentication.

use std::env;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    PubSub,
    Datastore,
    Kms,
}

impl Service {
    pub fn emulator_env_var(self) -> &'static str {
        match self {
            Service::PubSub => "PUBSUB_EMULATOR_HOST",
            Service::Datastore => "DATASTORE_EMULATOR_HOST",
            Service::Kms => "KMS_EMULATOR_HOST",
        }
    }

    pub fn default_root(self) -> &'static str {
        match self {
            Service::PubSub => "https://pubsub.googleapis.com/v1",
            Service::Datastore => "https://datastore.googleapis.com/v1",
            Service::Kms => "https://cloudkms.googleapis.com/v1",
        }
    }
}

/// Resolved root URL for a service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiRoot {
    pub url: String,
    /// True when an emulator is in use; callers must skip authentication.
    pub is_emulator: bool,
}

pub fn api_root(service: Service) -> ApiRoot {
    match env::var(service.emulator_env_var()) {
        Ok(host) if !host.trim().is_empty() => ApiRoot {
            url: format!("http://{}/v1", host.trim().trim_end_matches('/')),
            is_emulator: true,
        },
        _ => ApiRoot {
            url: service.default_root().to_string(),
            is_emulator: false,
        },
    }
}
