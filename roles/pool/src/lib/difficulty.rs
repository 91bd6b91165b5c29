//! Difficulty control. Three sources can override a connection's
//! difficulty, resolved at fixed moments:
//!
//! 1. the NiceHash static minimum, at subscribe time;
//! 2. a `d=<number>` control variable in the password, at authorize time;
//! 3. a client suggestion (`mining.suggest_difficulty` or the
//!    `minimum-difficulty` configure extension), accepted only above the
//!    endpoint's base difficulty.
//!
//! Everything goes through `WorkerContext::set_difficulty`, so promotions
//! stay decoupled from notifications.

use crate::{nicehash::NicehashService, worker::WorkerContext};
use tracing::{debug, info};

/// Control variables are embedded in the password field, comma-separated:
/// `"x,d=1024"`.
pub const PASSWORD_CONTROL_VARS_SEPARATOR: char = ',';

#[derive(Debug, Default, Clone, PartialEq)]
pub struct PasswordControlVars {
    pub static_diff: Option<f64>,
}

pub fn parse_password_control_vars(password: &str) -> PasswordControlVars {
    let mut vars = PasswordControlVars::default();
    for token in password.split(PASSWORD_CONTROL_VARS_SEPARATOR) {
        if let Some(raw) = token.trim().strip_prefix("d=") {
            match raw.parse::<f64>() {
                Ok(value) if value > 0.0 => vars.static_diff = Some(value),
                _ => debug!("ignoring unparseable static diff control var: {token}"),
            }
        }
    }
    vars
}

/// Consults the marketplace minimum for this connection's user agent. When
/// one applies, vardiff is disabled and the minimum is staged.
pub async fn apply_nicehash_static_diff(
    ctx: &mut WorkerContext,
    service: &dyn NicehashService,
    coin: &str,
    algorithm: &str,
) -> bool {
    let Some(agent) = ctx.user_agent.clone() else {
        return false;
    };
    match service.static_min_diff(&agent, coin, algorithm).await {
        Some(min_diff) if min_diff > 0.0 => {
            info!(
                "applying NiceHash static minimum difficulty {min_diff} to {}",
                ctx.connection_id
            );
            ctx.vardiff = None;
            ctx.set_difficulty(min_diff);
            true
        }
        _ => false,
    }
}

/// Applies a `d=` password override (§authorize). Honored when it sits at
/// or above the vardiff floor, or — with vardiff disabled — strictly above
/// the current difficulty. Returns true when staged.
pub fn apply_static_diff_from_password(ctx: &mut WorkerContext, password: &str) -> bool {
    let Some(requested) = parse_password_control_vars(password).static_diff else {
        return false;
    };
    let applies = match &ctx.vardiff {
        Some(vardiff) => requested >= vardiff.min_diff(),
        None => requested > ctx.difficulty(),
    };
    if applies {
        info!(
            "applying static difficulty {requested} from password for {}",
            ctx.connection_id
        );
        ctx.vardiff = None;
        ctx.set_difficulty(requested);
    } else {
        debug!(
            "ignoring static difficulty {requested} from password for {}",
            ctx.connection_id
        );
    }
    applies
}

/// Client-suggested difficulty: accepted only strictly above the endpoint
/// base. The configure-extension form also disables vardiff.
pub fn apply_suggested_difficulty(
    ctx: &mut WorkerContext,
    requested: f64,
    base_difficulty: f64,
    disable_vardiff: bool,
) -> bool {
    if !(requested > base_difficulty) {
        debug!(
            "rejecting suggested difficulty {requested} at or below endpoint base {base_difficulty}"
        );
        return false;
    }
    if disable_vardiff {
        ctx.vardiff = None;
    }
    ctx.set_difficulty(requested);
    true
}
