//! Indeed. Its apply flow currently goes through the generic filler; the
//! route exists so Indeed-specific steps can be slotted in without touching
//! dispatch.

use std::sync::Arc;

use async_trait::async_trait;

use super::generic::GenericStrategy;
use super::{ApplyOutcome, ApplyRequest, PortalStrategy};

pub struct IndeedStrategy {
    generic: Arc<GenericStrategy>,
}

impl IndeedStrategy {
    pub fn new(generic: Arc<GenericStrategy>) -> Self {
        Self { generic }
    }
}

#[async_trait]
impl PortalStrategy for IndeedStrategy {
    fn name(&self) -> &'static str {
        "indeed"
    }

    async fn apply(&self, req: ApplyRequest<'_>) -> ApplyOutcome {
        let mut outcome = self.generic.apply(req).await;
        outcome.portal = self.name().to_string();
        outcome
    }
}
