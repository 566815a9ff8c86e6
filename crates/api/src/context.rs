use jobrelay_core::OwnerId;

/// Owner on whose behalf a request acts, resolved from its API key.
///
/// Present on every route behind the auth middleware.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct OwnerContext {
    owner_id: OwnerId,
}

impl OwnerContext {
    pub fn new(owner_id: OwnerId) -> Self {
        Self { owner_id }
    }

    pub fn owner_id(&self) -> OwnerId {
        self.owner_id
    }
}
