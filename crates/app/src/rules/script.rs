//! Interpreter for [`RuleScript`] bodies.

use std::time::Duration;

use hearth_domain::error::HearthError;
use hearth_domain::script::{Action, Condition, RuleScript};

use super::context::{RuleBody, RuleContext};

/// A [`RuleScript`] running as a rule body.
#[derive(Debug, Clone)]
pub struct ScriptRule {
    script: RuleScript,
}

impl ScriptRule {
    /// # Errors
    ///
    /// Returns [`HearthError::Validation`] if the script is invalid.
    pub fn new(script: RuleScript) -> Result<Self, HearthError> {
        script.validate()?;
        Ok(Self { script })
    }

    #[must_use]
    pub fn script(&self) -> &RuleScript {
        &self.script
    }
}

fn holds(ctx: &mut RuleContext<'_>, condition: &Condition) -> bool {
    match condition {
        Condition::DevicePresent { identifier } => ctx.device(identifier).is_some(),
        Condition::Equals { service, key, .. }
        | Condition::Above { service, key, .. }
        | Condition::Below { service, key, .. } => {
            let current = ctx.value(service, key);
            condition.test(current.as_ref())
        }
    }
}

impl RuleBody for ScriptRule {
    fn run(&self, ctx: &mut RuleContext<'_>) -> Result<(), HearthError> {
        // every condition is evaluated so all of them are watched
        let mut matched = true;
        for condition in &self.script.when {
            let ok = holds(ctx, condition);
            tracing::trace!(rule = %self.script.name, %condition, ok, "condition evaluated");
            matched &= ok;
        }

        let branch = if matched {
            &self.script.then
        } else {
            &self.script.otherwise
        };
        for action in branch {
            match action {
                Action::Constrain {
                    service,
                    key,
                    value,
                    priority,
                } => ctx.constrain(service, key.clone(), value.clone(), *priority),
                Action::Set {
                    service,
                    key,
                    value,
                } => ctx.set(service, key.clone(), value.clone()),
                Action::Trigger {
                    service,
                    action,
                    args,
                } => ctx.trigger(service, action.clone(), args.clone()),
            }
        }

        if let Some(secs) = self.script.every_secs {
            ctx.run_in(Duration::from_secs(secs));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_reject_script_without_actions() {
        let script = RuleScript {
            name: "empty".to_string(),
            enabled: true,
            when: Vec::new(),
            then: Vec::new(),
            otherwise: Vec::new(),
            every_secs: None,
        };
        assert!(ScriptRule::new(script).is_err());
    }
}
