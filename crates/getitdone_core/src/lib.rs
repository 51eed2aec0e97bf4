pub mod accounts;
pub mod catalog;
pub mod domain;
pub mod error;
pub mod messaging;
pub mod notifications;
pub mod ports;
pub mod store;
pub mod tasks;
pub mod workflow;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;

pub use accounts::{AccountService, UserQuery};
pub use catalog::{PriceRange, SortKey, TaskCatalog, TaskFilters, TimeFilter};
pub use domain::{
    Application, ApplicationId, ApplicationStatus, CompletionData, Conversation, Coordinates,
    JobType, Message, MessageId, NewTask, NewUser, Notification, NotificationId, NotificationKind,
    PayType, ProfilePatch, Rating, Task, TaskId, TaskPatch, TaskStatus, User, UserAccount,
    UserCredentials, UserId,
};
pub use error::{WorkflowError, WorkflowResult};
pub use messaging::Messenger;
pub use notifications::{NotificationCenter, NotificationQuery};
pub use ports::{Clock, FixedClock, PortError, PortResult, StoreBackend, SystemClock};
pub use store::{ChangeSet, EntityStore, MemoryBackend, Record, Tables};
pub use tasks::TaskBoard;
pub use workflow::ApplicationWorkflow;

/// Every component, wired to one shared store and clock.
pub struct Marketplace {
    pub accounts: AccountService,
    pub tasks: TaskBoard,
    pub catalog: TaskCatalog,
    pub workflow: ApplicationWorkflow,
    pub messaging: Messenger,
    pub notifications: NotificationCenter,
}

impl Marketplace {
    pub fn new(store: Arc<EntityStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            accounts: AccountService::new(store.clone(), clock.clone()),
            tasks: TaskBoard::new(store.clone(), clock.clone()),
            catalog: TaskCatalog::new(store.clone(), clock.clone()),
            workflow: ApplicationWorkflow::new(store.clone(), clock.clone()),
            messaging: Messenger::new(store.clone(), clock.clone()),
            notifications: NotificationCenter::new(store, clock),
        }
    }
}
