//! Shared evaluation context for planning and applying

use std::collections::HashMap;
use stratus_template::{BoundParameters, EvalContext, Template};

/// Everything about the stack that planning and applying both need:
/// the template, bound parameters and the system values.
#[derive(Debug, Clone, Copy)]
pub struct StackContext<'a> {
    pub template: &'a Template,
    pub parameters: &'a BoundParameters,
    pub region: &'a str,
    pub account_id: &'a str,
}

impl<'a> StackContext<'a> {
    /// Expression evaluation context over the given attribute map.
    pub fn eval_context<'b>(
        &self,
        attributes: &'b HashMap<String, HashMap<String, String>>,
    ) -> EvalContext<'b>
    where
        'a: 'b,
    {
        EvalContext {
            template: self.template,
            parameters: self.parameters,
            region: self.region,
            account_id: self.account_id,
            attributes,
        }
    }
}
