pub mod data {
    pub mod datasources {
        pub mod access_token_provider;
        pub mod entitlement_cache_datasource;
        pub mod key_value_storage;
        pub(crate) mod subscription_api_datasource;
    }
    pub(crate) mod models {
        pub(crate) mod subscription_api {
            pub(crate) mod envelope_model;
            pub(crate) mod restore_model;
            pub(crate) mod status_model;
            pub(crate) mod subscription_model;
            pub(crate) mod validate_receipt_model;
        }
    }
    pub(crate) mod repositories {
        pub(crate) mod subscription_repository_impl;
    }
    pub mod stores {
        pub mod app_store_adapter;
        pub mod play_store_adapter;
        pub(crate) mod store_state;
    }
}

pub mod domain {
    pub mod entities {
        pub mod entitlement;
        pub mod iap_product_id;
        pub mod iap_purchase_id;
        pub mod purchase_transaction;
        pub mod store_event;
        pub mod store_product;
        pub mod subscription_record;
    }
    pub mod repositories {
        pub mod subscription_repository;
    }
    pub mod services {
        pub mod connection_manager;
        pub mod feature_gate;
        pub(crate) mod receipt_validator;
        pub(crate) mod reconciliation_loop;
        pub mod session_entitlement;
    }
    pub mod stores {
        pub mod entitlement_store;
    }
}

pub mod config;
pub mod constants;
pub mod errors;
pub mod util;

#[cfg(test)]
mod test_support;

pub use config::IapConfig;
pub use errors::{IapError, IapErrorKind};
pub use util::EntitlementReconciler;
