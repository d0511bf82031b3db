//! Row filter kernel.
//!
//! Predicates have the form `column OP literal` with
//! OP one of `==`, `!=`, `<`, `<=`, `>`, `>=`. The literal is parsed according
//! to the type of each value it is compared against; nulls never match.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use epochflow_core::types::{Column, RowBatch, Scalar};

use crate::traits::{Kernel, OpError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    // two-char operators first so "<=" is not read as "<"
    const TOKENS: [(&'static str, CmpOp); 6] = [
        ("==", CmpOp::Eq),
        ("!=", CmpOp::Ne),
        ("<=", CmpOp::Le),
        (">=", CmpOp::Ge),
        ("<", CmpOp::Lt),
        (">", CmpOp::Gt),
    ];

    fn holds(self, ord: Ordering) -> bool {
        match self {
            CmpOp::Eq => ord == Ordering::Equal,
            CmpOp::Ne => ord != Ordering::Equal,
            CmpOp::Lt => ord == Ordering::Less,
            CmpOp::Le => ord != Ordering::Greater,
            CmpOp::Gt => ord == Ordering::Greater,
            CmpOp::Ge => ord != Ordering::Less,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterRows {
    pub column: String,
    pub op: CmpOp,
    pub literal: String,
}

impl FilterRows {
    pub fn parse(expr: &str) -> Result<Self, OpError> {
        for (token, op) in CmpOp::TOKENS {
            if let Some(pos) = expr.find(token) {
                let column = expr[..pos].trim();
                let literal = expr[pos + token.len()..].trim();
                if column.is_empty() || literal.is_empty() {
                    break;
                }
                return Ok(Self {
                    column: column.to_string(),
                    op,
                    literal: literal.to_string(),
                });
            }
        }
        Err(OpError::Parse(format!("unparseable predicate: {expr}")))
    }

    fn matches(&self, value: &Scalar) -> Result<bool, OpError> {
        let lit = self.literal.as_str();
        let bad = |ty: &str| OpError::Exec(format!("cannot parse '{lit}' as {ty}"));
        let ord = match value {
            Scalar::Null => return Ok(false),
            Scalar::Bool(b) => {
                let rhs: bool = lit.parse().map_err(|_| bad("bool"))?;
                if !matches!(self.op, CmpOp::Eq | CmpOp::Ne) {
                    return Err(OpError::Exec(format!("unsupported comparison {:?} for bool", self.op)));
                }
                b.cmp(&rhs)
            }
            Scalar::I32(v) => v.cmp(&lit.parse::<i32>().map_err(|_| bad("i32"))?),
            Scalar::I64(v) => v.cmp(&lit.parse::<i64>().map_err(|_| bad("i64"))?),
            Scalar::F32(v) => {
                let rhs: f32 = lit.parse().map_err(|_| bad("f32"))?;
                v.partial_cmp(&rhs).ok_or_else(|| bad("comparable f32"))?
            }
            Scalar::F64(v) => {
                let rhs: f64 = lit.parse().map_err(|_| bad("f64"))?;
                v.partial_cmp(&rhs).ok_or_else(|| bad("comparable f64"))?
            }
            Scalar::Str(s) => s.as_str().cmp(lit),
            Scalar::Bin(_) => return Err(OpError::Exec("cannot filter on binary data".into())),
        };
        Ok(self.op.holds(ord))
    }
}

impl Kernel for FilterRows {
    fn name(&self) -> &'static str {
        "filter"
    }

    fn compute(&self, input: RowBatch) -> Result<RowBatch, OpError> {
        let keep = input
            .column(&self.column)
            .ok_or_else(|| OpError::Schema(format!("column '{}' not found", self.column)))?
            .values
            .iter()
            .map(|v| self.matches(v))
            .collect::<Result<Vec<bool>, OpError>>()?;

        let columns = input
            .columns
            .into_iter()
            .map(|col| {
                let values = col
                    .values
                    .into_iter()
                    .zip(&keep)
                    .filter_map(|(v, keep)| keep.then_some(v))
                    .collect();
                Column::new(col.name, values)
            })
            .collect();
        Ok(RowBatch::new(columns))
    }
}
