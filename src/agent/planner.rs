// ABOUTME: Planning mode — a toggle that extends the system prompt with plan-first instructions.
// ABOUTME: Holding back tool execution while planning is left to the caller.

pub const PLAN_MODE_PROMPT: &str = "You are in PLAN MODE. In this mode, you should:

1. Analyze the user's request carefully
2. Think through the problem step by step
3. Create a numbered plan of actions you would take
4. Do NOT execute any tools yet. Only describe what you would do
5. Present your plan clearly and ask the user for approval

Format your plan as:
## Plan
1. Step one description
2. Step two description
...

After presenting the plan, ask: \"Would you like me to proceed with this plan?\"";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Planner {
    enabled: bool,
}

impl Planner {
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Flip the mode and return the new state.
    pub fn toggle(&mut self) -> bool {
        self.enabled = !self.enabled;
        self.enabled
    }

    /// Text appended to the system prompt; empty when disabled.
    pub fn system_prompt_addition(&self) -> String {
        if self.enabled {
            format!("\n\n{PLAN_MODE_PROMPT}")
        } else {
            String::new()
        }
    }

    /// `base` with the planning addition applied.
    pub fn apply(&self, base: &str) -> String {
        format!("{base}{}", self.system_prompt_addition())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_planner_adds_nothing() {
        let planner = Planner::default();
        assert!(!planner.is_enabled());
        assert_eq!(planner.apply("base"), "base");
    }

    #[test]
    fn toggle_appends_plan_prompt_after_blank_line() {
        let mut planner = Planner::default();
        assert!(planner.toggle());
        let prompt = planner.apply("base");
        assert!(prompt.starts_with("base\n\nYou are in PLAN MODE."));
        assert!(prompt.ends_with("proceed with this plan?\""));
        assert!(!planner.toggle());
    }
}
