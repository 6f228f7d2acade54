//! Admin HTTP server.
//!
//! Exposes the operational endpoints of the ingester. Currently that is
//! `POST /flush`, which forces a sweep of every stream so all buffered
//! chunks are scheduled for persistence.

pub mod flush;

use std::sync::Arc;

use axum::{Router, routing::post};
use timber_ingester_core::Ingester;

use crate::flush::flush_handler;

pub struct AdminServer {
    state: AdminState,
}

#[derive(Clone)]
pub struct AdminState {
    pub(crate) ingester: Arc<Ingester>,
}

impl AdminServer {
    pub fn new(ingester: Arc<Ingester>) -> Self {
        Self {
            state: AdminState { ingester },
        }
    }

    pub fn into_router(self) -> Router {
        Router::new()
            .route("/flush", post(flush_handler))
            .with_state(self.state)
    }
}
