//! Saga transaction coordinator.
//!
//! Tracks long-running business transactions made of independently
//! committing sub-transactions run by remote participants. When a
//! sub-transaction or the saga aborts, every sub-transaction that already
//! committed is compensated in reverse order, with retries and timeouts.
//!
//! Each global transaction is handled by one worker task:
//! 1. [`SagaStateMachine::decide`] picks the domain events and effects
//! 2. the events are journaled in the [`event_store`]
//! 3. [`SagaData::apply`] folds them into the saga data
//! 4. effects dispatch compensation or arm timers
//!
//! Replaying the journal runs only step 3, so recovery never re-sends
//! compensation.

mod actor;
pub mod channel;
pub mod compensation;
pub mod data;
pub mod domain;
pub mod error;
pub mod events;
pub mod machine;
pub mod router;
pub mod settings;
pub mod sink;
pub mod state;
pub mod tx_entity;

pub use channel::{CompensateCommand, CompensationChannel, OmegaRegistry, ParticipantId};
pub use compensation::CompensationDriver;
pub use data::{EventLogEntry, SagaData};
pub use domain::SagaDomainEvent;
pub use error::{Result, SagaError};
pub use events::{EventHeader, SagaEvent, TxStartedData};
pub use machine::{Decision, Effect, SagaMessage, SagaStateMachine};
pub use router::SagaRouter;
pub use settings::SagaSettings;
pub use sink::{InMemorySagaDataRepository, SagaDataSink};
pub use state::{SagaState, SuspendedType};
pub use tx_entity::{TxEntity, TxState};
