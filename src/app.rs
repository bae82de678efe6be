use std::sync::Arc;

use anyhow::{Context, Result};

use crate::api;
use crate::auth;
use crate::config;
use crate::controller::{self, Controller, Services};
use crate::data;
use crate::storage;
use crate::ui;
use crate::urlstate;

/// Boot the TUI. `initial_view` is an encoded view query string as
/// produced by the share action; passing one restores that exact view.
pub fn run(initial_view: Option<String>) -> Result<()> {
    let cfg = config::load(config::LoadOptions::default()).context("load config")?;

    let store = storage::Store::open(storage::Options::default()).context("open storage")?;
    let tokens = Arc::new(auth::TokenStore::new(store.clone()));
    let has_token = tokens.hydrate().context("restore session")?;

    let remote = !cfg.api.base_url.trim().is_empty();
    let services = if remote {
        let client = Arc::new(
            api::Client::new(
                tokens.clone(),
                api::ClientConfig {
                    base_url: cfg.api.base_url.clone(),
                    user_agent: cfg.api.user_agent.clone(),
                    timeout: Some(cfg.api.timeout),
                    http_client: None,
                },
            )
            .context("build api client")?,
        );
        Services {
            search: Arc::new(data::RemoteSearchService::new(client.clone())),
            follows: Arc::new(data::RemoteFollowsService::new(client.clone())),
            images: Arc::new(data::RemoteImageService::new(client.clone())),
            auth: Arc::new(data::RemoteAuthService::new(client)),
        }
    } else {
        Services {
            search: Arc::new(data::MockSearchService),
            follows: Arc::new(data::MockFollowsService),
            images: Arc::new(data::MockImageService),
            auth: Arc::new(data::MockAuthService),
        }
    };

    let options = controller::Options {
        per_page: cfg.ui.per_page,
        page_window: cfg.ui.page_window,
        channels: cfg.ui.channels.clone(),
        image_debounce: cfg.images.debounce,
        image_max_attempts: cfg.images.max_attempts,
    };

    let mut ctrl = Controller::new(services, options);
    if let Some(view) = initial_view {
        ctrl.restore(urlstate::decode(&view));
    }

    let status_message = if !remote {
        "no server configured; browsing sample data".to_string()
    } else if !has_token {
        "not logged in; press i to sign in".to_string()
    } else {
        "ready".to_string()
    };

    let mut model = ui::Model::new(ui::Options {
        controller: ctrl,
        store,
        tokens,
        guild_id: cfg.ui.guild_id.clone(),
        status_message,
    });
    model.run()
}
