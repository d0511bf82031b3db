//! Column renaming kernel.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use epochflow_core::types::{Column, RowBatch};

use crate::traits::{Kernel, OpError};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RenameColumns {
    /// old_name -> new_name
    pub renames: HashMap<String, String>,
}

impl RenameColumns {
    /// Parse `"old AS new, other AS renamed"`. `AS` is case-insensitive;
    /// clauses without it are rejected.
    pub fn parse(expr: &str) -> Result<Self, OpError> {
        let mut renames = HashMap::new();
        for clause in expr.split(',').map(str::trim).filter(|c| !c.is_empty()) {
            let Some(pos) = clause.to_ascii_lowercase().find(" as ") else {
                return Err(OpError::Parse(format!("expected 'old AS new', got '{clause}'")));
            };
            let old = clause[..pos].trim();
            let new = clause[pos + 4..].trim();
            if old.is_empty() || new.is_empty() {
                return Err(OpError::Parse(format!("empty column name in '{clause}'")));
            }
            if renames.insert(old.to_string(), new.to_string()).is_some() {
                return Err(OpError::Parse(format!("column '{old}' renamed twice")));
            }
        }
        Ok(Self { renames })
    }
}

impl Kernel for RenameColumns {
    fn name(&self) -> &'static str {
        "rename"
    }

    fn compute(&self, input: RowBatch) -> Result<RowBatch, OpError> {
        if self.renames.is_empty() {
            return Ok(input);
        }
        let columns = input
            .columns
            .into_iter()
            .map(|col| match self.renames.get(&col.name) {
                Some(new) => Column::new(new.clone(), col.values),
                None => col,
            })
            .collect();
        Ok(RowBatch::new(columns))
    }
}
