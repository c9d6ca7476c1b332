use serde::Serialize;
use ticker_core::{PriceSample, SubscriberId, Symbol};
use tokio::sync::{mpsc, oneshot};

use crate::multiplexer::Delivery;
use crate::reader::{ReaderEvent, ReaderState};

/// Sending half of one subscriber's delivery queue
pub(crate) type Outlet = mpsc::UnboundedSender<Delivery>;

/// Identifies one subscription, distinct across reuses of a subscriber id
pub type Ticket = u64;

/// Commands processed by a symbol actor, one at a time
#[derive(Debug)]
pub(crate) enum SymbolCommand {
    /// Attach a subscriber and its outlet
    Subscribe {
        subscriber: SubscriberId,
        ticket: Ticket,
        outlet: Outlet,
        response: oneshot::Sender<SubscribeReply>,
    },

    /// Detach a subscriber if `ticket` is still the subscription it holds
    Unsubscribe {
        subscriber: SubscriberId,
        ticket: Ticket,
        response: oneshot::Sender<bool>,
    },

    /// Output of the reader started under `epoch`
    Reader { epoch: u64, event: ReaderEvent },

    /// Read-only view of the symbol state
    Snapshot {
        response: oneshot::Sender<SymbolSnapshot>,
    },

    /// Drop every subscriber and tear down
    Shutdown { response: oneshot::Sender<()> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SubscribeReply {
    Added { cache_hit: bool },
    AlreadySubscribed,
    /// The actor is retiring; look the symbol up again
    Retry,
}

/// Result of a registry subscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscribeOutcome {
    /// Joined a symbol with no cached price yet
    Joined,
    /// The cached price was delivered immediately
    CacheHit,
    /// The subscriber was already attached to this symbol
    AlreadySubscribed,
}

/// An accepted registry subscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subscription {
    pub outcome: SubscribeOutcome,
    pub ticket: Ticket,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SymbolSnapshot {
    pub symbol: Symbol,
    pub subscribers: usize,
    pub reader: Option<ReaderState>,
    pub last_sample: Option<PriceSample>,
    pub cleanup_pending: bool,
}

impl SymbolSnapshot {
    pub(crate) fn empty(symbol: Symbol) -> Self {
        Self {
            symbol,
            subscribers: 0,
            reader: None,
            last_sample: None,
            cleanup_pending: false,
        }
    }
}
