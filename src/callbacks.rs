//! Event callback registry
//!
//! Every event the dispatcher can route to the OS integration layer maps to
//! one [`EventKind`]. Integrators register an [`EventHandler`] per kind in the
//! device's [`CallbackTable`]; any subset of kinds may be left unregistered.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::device::OsVifHandle;
use crate::proto::UmacEvent;
use crate::Result;

/// Event kinds that can carry a registered handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    ScanStart,
    ScanDone,
    ScanAbort,
    ScanResult,
    ScanDisplayResult,
    AuthResp,
    AssocResp,
    Deauth,
    Disassoc,
    MgmtRx,
    TxPwrGet,
    ChannelGet,
    GetStation,
    GetInterface,
    CookieResp,
    MgmtTxStatus,
    UnprotMlmeMgmtRx,
    SetInterface,
    TwtConfig,
    TwtTeardown,
    TwtSleep,
    GetWiphy,
    GetPowerSaveInfo,
    GetReg,
    RegChange,
    RocStart,
    RocCancel,
    GetConnectionInfo,
    /// Carrier on/off, raised from DATA sub-events
    CarrierState,
}

impl EventKind {
    /// Every kind, in declaration order
    pub const ALL: [EventKind; 29] = [
        EventKind::ScanStart,
        EventKind::ScanDone,
        EventKind::ScanAbort,
        EventKind::ScanResult,
        EventKind::ScanDisplayResult,
        EventKind::AuthResp,
        EventKind::AssocResp,
        EventKind::Deauth,
        EventKind::Disassoc,
        EventKind::MgmtRx,
        EventKind::TxPwrGet,
        EventKind::ChannelGet,
        EventKind::GetStation,
        EventKind::GetInterface,
        EventKind::CookieResp,
        EventKind::MgmtTxStatus,
        EventKind::UnprotMlmeMgmtRx,
        EventKind::SetInterface,
        EventKind::TwtConfig,
        EventKind::TwtTeardown,
        EventKind::TwtSleep,
        EventKind::GetWiphy,
        EventKind::GetPowerSaveInfo,
        EventKind::GetReg,
        EventKind::RegChange,
        EventKind::RocStart,
        EventKind::RocCancel,
        EventKind::GetConnectionInfo,
        EventKind::CarrierState,
    ];

    /// Handler slot for a UMAC event, if the event is routed to one
    pub fn from_umac(event: UmacEvent) -> Option<Self> {
        let kind = match event {
            UmacEvent::TriggerScanStart => Self::ScanStart,
            UmacEvent::ScanDone => Self::ScanDone,
            UmacEvent::ScanAborted => Self::ScanAbort,
            UmacEvent::ScanResult => Self::ScanResult,
            UmacEvent::ScanDisplayResult => Self::ScanDisplayResult,
            UmacEvent::Authenticate => Self::AuthResp,
            UmacEvent::Associate => Self::AssocResp,
            UmacEvent::Deauthenticate => Self::Deauth,
            UmacEvent::Disassociate => Self::Disassoc,
            UmacEvent::Frame => Self::MgmtRx,
            UmacEvent::GetTxPower => Self::TxPwrGet,
            UmacEvent::GetChannel => Self::ChannelGet,
            UmacEvent::GetStation => Self::GetStation,
            UmacEvent::NewInterface => Self::GetInterface,
            UmacEvent::CookieResp => Self::CookieResp,
            UmacEvent::FrameTxStatus => Self::MgmtTxStatus,
            UmacEvent::UnprotDeauthenticate | UmacEvent::UnprotDisassociate => {
                Self::UnprotMlmeMgmtRx
            }
            UmacEvent::SetInterface => Self::SetInterface,
            UmacEvent::ConfigTwt => Self::TwtConfig,
            UmacEvent::TeardownTwt => Self::TwtTeardown,
            UmacEvent::TwtSleep => Self::TwtSleep,
            UmacEvent::NewWiphy => Self::GetWiphy,
            UmacEvent::GetPowerSaveInfo => Self::GetPowerSaveInfo,
            UmacEvent::GetReg => Self::GetReg,
            UmacEvent::RegChange => Self::RegChange,
            UmacEvent::RemainOnChannel => Self::RocStart,
            UmacEvent::CancelRemainOnChannel => Self::RocCancel,
            UmacEvent::GetConnectionInfo => Self::GetConnectionInfo,
            _ => return None,
        };
        Some(kind)
    }
}

/// Carrier state reported by DATA sub-events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CarrierState {
    On,
    Off,
}

/// Event data handed to a handler
///
/// `data` borrows the inbound buffer: for control events it starts at the
/// UMAC header, for carrier events at the data sub-event head.
#[derive(Debug, Clone, Copy)]
pub struct EventContext<'a> {
    pub kind: EventKind,
    pub if_idx: u8,
    pub data: &'a [u8],
    /// Firmware has more results queued for this request
    pub more_results: bool,
    pub carrier: Option<CarrierState>,
}

impl<'a> EventContext<'a> {
    /// Create new context for a control event
    pub fn new(kind: EventKind, if_idx: u8, data: &'a [u8]) -> Self {
        Self {
            kind,
            if_idx,
            data,
            more_results: false,
            carrier: None,
        }
    }

    pub fn with_more_results(mut self, more: bool) -> Self {
        self.more_results = more;
        self
    }

    pub fn with_carrier(mut self, state: CarrierState) -> Self {
        self.carrier = Some(state);
        self
    }
}

/// Event handler trait
pub trait EventHandler: Send + Sync {
    /// Handle an event for the interface identified by `vif`
    fn handle_event(&self, vif: &OsVifHandle, ctx: &EventContext<'_>) -> Result<()>;

    /// Get handler name
    fn name(&self) -> &str {
        "anonymous"
    }
}

impl<F> EventHandler for F
where
    F: Fn(&OsVifHandle, &EventContext<'_>) -> Result<()> + Send + Sync,
{
    fn handle_event(&self, vif: &OsVifHandle, ctx: &EventContext<'_>) -> Result<()> {
        self(vif, ctx)
    }
}

/// Per-device handler registry
#[derive(Default, Clone)]
pub struct CallbackTable {
    handlers: HashMap<EventKind, Arc<dyn EventHandler>>,
}

impl std::fmt::Debug for CallbackTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<_> = self.handlers.keys().collect();
        kinds.sort_by_key(|kind| format!("{:?}", kind));
        f.debug_struct("CallbackTable")
            .field("registered", &kinds)
            .finish()
    }
}

impl CallbackTable {
    /// Create new empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any previous one for `kind`
    pub fn register<H>(&mut self, kind: EventKind, handler: H) -> Option<Arc<dyn EventHandler>>
    where
        H: EventHandler + 'static,
    {
        self.register_arc(kind, Arc::new(handler))
    }

    /// Register a shared handler
    pub fn register_arc(
        &mut self,
        kind: EventKind,
        handler: Arc<dyn EventHandler>,
    ) -> Option<Arc<dyn EventHandler>> {
        log::debug!("Registering handler '{}' for {:?}", handler.name(), kind);
        self.handlers.insert(kind, handler)
    }

    /// Remove the handler for `kind`
    pub fn unregister(&mut self, kind: EventKind) -> bool {
        self.handlers.remove(&kind).is_some()
    }

    /// Get handler for `kind`
    pub fn get(&self, kind: EventKind) -> Option<Arc<dyn EventHandler>> {
        self.handlers.get(&kind).cloned()
    }

    pub fn is_registered(&self, kind: EventKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
