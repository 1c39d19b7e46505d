//! Tickets and the flows they own.
//!
//! A ticket is a user-submitted change request. It owns an ordered list of
//! flows, each one a single scene run against one resource. Ticket status is
//! derived from its flows; both are persisted through a [`TicketStore`].

mod flow;
mod sqlite_store;
mod store;
mod types;

pub use flow::{Flow, FlowError, FlowErrorKind, FlowPlan, FlowStatus, FlowUpdate, NewFlow};
pub use sqlite_store::SqliteTicketStore;
pub use store::{CreateTicketRequest, NewTicket, TicketError, TicketFilter, TicketStore};
pub use types::{Ticket, TicketStatus, TicketType};
