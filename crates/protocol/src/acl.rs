use bitflags::bitflags;

use crate::{ContextId, Message};

bitflags! {
    /// Permission state that changed while handling a message.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct AclChanges: u8 {
        const USERS = 1 << 0;
        const LAYERS = 1 << 1;
        const FEATURES = 1 << 2;
        const ANNOTATIONS = 1 << 3;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct AclVerdict {
    pub filtered: bool,
    pub changes: AclChanges,
}

impl AclVerdict {
    pub const ADMIT: Self = Self {
        filtered: false,
        changes: AclChanges::empty(),
    };

    pub const FILTER: Self = Self {
        filtered: true,
        changes: AclChanges::empty(),
    };
}

/// Access control evaluated for every remote message before it is queued.
/// Implementations may track state (user operator status, layer locks) as
/// messages pass through.
pub trait AclState {
    fn handle(&mut self, message: &Message, override_acls: bool) -> AclVerdict;

    /// Context id of the local user, if connected. A filtered message from
    /// this context is a rejected echo of a local operation.
    fn local_context_id(&self) -> Option<ContextId> {
        None
    }
}

/// Admits everything. Used for offline sessions and playback.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl AclState for AllowAll {
    fn handle(&mut self, _message: &Message, _override_acls: bool) -> AclVerdict {
        AclVerdict::ADMIT
    }
}
