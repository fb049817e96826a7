use crate::{
    config::Config,
    fanout::{Publisher, Subscriber, Transport},
    identity::{IdentityResolver, JwtIdentityResolver},
    services::{ConversationService, MessageService, UserService},
    store::ChatStore,
};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ChatStore>,
    pub identity: Arc<dyn IdentityResolver>,
    pub conversations: ConversationService,
    pub messages: MessageService,
    pub users: UserService,
    /// Registry client event streams subscribe to
    pub events: Arc<dyn Subscriber>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(
        config: Config,
        store: Arc<dyn ChatStore>,
        transport: Arc<dyn Transport>,
        events: Arc<dyn Subscriber>,
    ) -> Self {
        let identity = Arc::new(JwtIdentityResolver::new(
            store.clone(),
            &config.session_jwt_secret,
        ));
        Self::with_identity(config, store, transport, events, identity)
    }

    pub fn with_identity(
        config: Config,
        store: Arc<dyn ChatStore>,
        transport: Arc<dyn Transport>,
        events: Arc<dyn Subscriber>,
        identity: Arc<dyn IdentityResolver>,
    ) -> Self {
        let publisher =
            Publisher::new(transport, config.fanout_timeout).detached(config.fanout_detached);
        Self {
            conversations: ConversationService::new(store.clone(), publisher.clone()),
            messages: MessageService::new(store.clone(), publisher),
            users: UserService::new(store.clone()),
            store,
            identity,
            events,
            config: Arc::new(config),
        }
    }
}
