//! Indicator lookup and access control.

use crate::domain::error::EngineError;
use crate::domain::indicator::{Indicator, IndicatorId, UserId, Visibility};
use crate::ports::store_port::IndicatorRepository;

pub fn load_indicator(
    repo: &dyn IndicatorRepository,
    id: IndicatorId,
) -> Result<Indicator, EngineError> {
    repo.find_indicator(id)?
        .ok_or(EngineError::IndicatorNotFound { id })
}

/// Owners may use any of their indicators; everyone else only PUBLIC or UNLISTED ones.
pub fn authorize(indicator: &Indicator, requester_id: UserId) -> Result<(), EngineError> {
    if indicator.owner_id == requester_id {
        return Ok(());
    }
    match indicator.visibility {
        Visibility::Public | Visibility::Unlisted => Ok(()),
        Visibility::Private => Err(EngineError::AccessDenied {
            indicator_id: indicator.id,
            requester_id,
        }),
    }
}

/// Loads an indicator and checks that `requester_id` may use it.
pub fn load_authorized(
    repo: &dyn IndicatorRepository,
    id: IndicatorId,
    requester_id: UserId,
) -> Result<Indicator, EngineError> {
    let indicator = load_indicator(repo, id)?;
    authorize(&indicator, requester_id)?;
    Ok(indicator)
}
