//! Snapshot evaluation of query plans against the record store.
//!
//! Evaluation is deterministic: identical store contents and inputs
//! yield identical ordered results. Subquery projections are expanded
//! inline and the matched child records are reported alongside the
//! primary rows so the view can version them.

use crate::engine::operators::{Operator, Predicate, Projection};
use crate::engine::store::Store;
use crate::engine::types::{Datum, FastMap, FastSet, Path, RecordKey};
use crate::error::EngineError;
use crate::normalize::normalize_record_id;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use smol_str::SmolStr;
use std::cmp::Ordering;

/// One projected row of a view result.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResultRow {
    pub id: RecordKey,
    pub data: Datum,
}

/// Full evaluation output: ordered primary rows plus the deduplicated
/// child records matched by subquery projections.
#[derive(Debug, Default)]
pub struct EvalOutput {
    pub rows: Vec<ResultRow>,
    pub children: Vec<ResultRow>,
}

pub fn evaluate(
    plan: &Operator,
    params: Option<&Datum>,
    store: &Store,
) -> Result<EvalOutput, EngineError> {
    let mut children = Vec::new();
    let rows = eval_rows(plan, store, params, None, &mut children)?;

    let mut seen: FastSet<RecordKey> = FastSet::default();
    children.retain(|c| seen.insert(c.id.clone()));

    Ok(EvalOutput { rows, children })
}

fn eval_rows(
    op: &Operator,
    store: &Store,
    params: Option<&Datum>,
    context: Option<&Datum>,
    children: &mut Vec<ResultRow>,
) -> Result<Vec<ResultRow>, EngineError> {
    let ids = eval_ids(op, store, params, context)?;
    let projections = projections_of(op);

    let mut rows = Vec::with_capacity(ids.len());
    for id in ids {
        let Some(base) = store.record(&id) else {
            continue;
        };
        let data = match projections {
            None => base.clone(),
            Some(projs) => project_row(&id, base, projs, store, params, children)?,
        };
        rows.push(ResultRow { id, data });
    }
    Ok(rows)
}

/// The id set produced by an operator, in result order.
fn eval_ids(
    op: &Operator,
    store: &Store,
    params: Option<&Datum>,
    context: Option<&Datum>,
) -> Result<Vec<RecordKey>, EngineError> {
    match op {
        Operator::Scan { table } => Ok(store
            .table(table)
            .map(|t| t.iter().map(|(k, _)| k.clone()).collect())
            .unwrap_or_default()),

        Operator::Filter { input, predicate } => {
            let upstream = eval_ids(input, store, params, context)?;
            let mut out = Vec::with_capacity(upstream.len());
            for key in upstream {
                if check_predicate(predicate, &key, store, params, context)? {
                    out.push(key);
                }
            }
            Ok(out)
        }

        Operator::Project { input, .. } => eval_ids(input, store, params, context),

        Operator::Limit {
            input,
            limit,
            order_by,
        } => {
            let mut ids = eval_ids(input, store, params, context)?;

            if let Some(orders) = order_by {
                ids.sort_by(|a, b| {
                    let row_a = store.record(a);
                    let row_b = store.record(b);
                    for ord in orders {
                        let va = resolve_nested_value(row_a, &ord.field);
                        let vb = resolve_nested_value(row_b, &ord.field);
                        let cmp = compare_datums(va, vb);
                        if cmp != Ordering::Equal {
                            return if ord.is_descending() { cmp.reverse() } else { cmp };
                        }
                    }
                    a.cmp(b)
                });
            } else {
                // A limit without an order still has to be stable
                // across processors.
                ids.sort_unstable();
            }

            if let Some(n) = limit {
                ids.truncate(*n);
            }
            Ok(ids)
        }
    }
}

/// Locate the projection list of a plan, looking through `Limit`.
fn projections_of(op: &Operator) -> Option<&Vec<Projection>> {
    match op {
        Operator::Project { projections, .. } => Some(projections),
        Operator::Limit { input, .. } => projections_of(input),
        _ => None,
    }
}

fn project_row(
    id: &RecordKey,
    base: &Datum,
    projections: &[Projection],
    store: &Store,
    params: Option<&Datum>,
    children: &mut Vec<ResultRow>,
) -> Result<Datum, EngineError> {
    let mut out: FastMap<SmolStr, Datum> = FastMap::default();

    for proj in projections {
        match proj {
            Projection::All => {
                if let Datum::Object(map) = base {
                    for (k, v) in map {
                        out.insert(k.clone(), v.clone());
                    }
                }
            }
            Projection::Field { name } => {
                if let Some(v) = resolve_nested_value(Some(base), name) {
                    out.insert(SmolStr::new(name.dotted()), v.clone());
                }
            }
            Projection::Subquery { alias, first, plan } => {
                let sub_rows = eval_rows(plan, store, params, Some(base), children)?;
                children.extend(sub_rows.iter().cloned());
                let value = if *first {
                    sub_rows
                        .into_iter()
                        .next()
                        .map(|r| r.data)
                        .unwrap_or(Datum::Null)
                } else {
                    Datum::Array(sub_rows.into_iter().map(|r| r.data).collect())
                };
                out.insert(SmolStr::new(alias.as_str()), value);
            }
        }
    }

    out.entry(SmolStr::new("id"))
        .or_insert_with(|| Datum::Str(id.clone()));
    Ok(Datum::Object(out))
}

pub fn check_predicate(
    pred: &Predicate,
    key: &str,
    store: &Store,
    params: Option<&Datum>,
    context: Option<&Datum>,
) -> Result<bool, EngineError> {
    match pred {
        Predicate::And { predicates } => {
            for p in predicates {
                if !check_predicate(p, key, store, params, context)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        Predicate::Or { predicates } => {
            for p in predicates {
                if check_predicate(p, key, store, params, context)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Predicate::Prefix { field, prefix } => {
            if field.is_id() {
                return Ok(key.starts_with(prefix.as_str()));
            }
            let matched = store
                .record(key)
                .and_then(|row| resolve_nested_value(Some(row), field))
                .and_then(Datum::as_str)
                .map(|s| s.starts_with(prefix.as_str()))
                .unwrap_or(false);
            Ok(matched)
        }
        Predicate::Eq { field, value }
        | Predicate::Neq { field, value }
        | Predicate::Gt { field, value }
        | Predicate::Gte { field, value }
        | Predicate::Lt { field, value }
        | Predicate::Lte { field, value } => {
            let Some(target) = resolve_comparand(value, params, context)? else {
                return Ok(false);
            };

            let actual = if field.is_id() {
                Some(Datum::Str(SmolStr::new(key)))
            } else {
                store
                    .record(key)
                    .and_then(|row| resolve_nested_value(Some(row), field))
                    .cloned()
                    .map(normalize_record_id)
            };

            let Some(actual) = actual else {
                return Ok(false);
            };

            let ord = compare_datums(Some(&actual), Some(&target));
            Ok(match pred {
                Predicate::Eq { .. } => ord == Ordering::Equal,
                Predicate::Neq { .. } => ord != Ordering::Equal,
                Predicate::Gt { .. } => ord == Ordering::Greater,
                Predicate::Gte { .. } => ord != Ordering::Less,
                Predicate::Lt { .. } => ord == Ordering::Less,
                Predicate::Lte { .. } => ord != Ordering::Greater,
                _ => false,
            })
        }
    }
}

/// Resolve the right-hand side of a comparison: a literal, a `$param`
/// bound value, or a `$parent.*` correlated reference.
///
/// A missing bound parameter is an evaluation error; an absent parent
/// field merely fails the match.
fn resolve_comparand(
    value: &Value,
    params: Option<&Datum>,
    context: Option<&Datum>,
) -> Result<Option<Datum>, EngineError> {
    if let Some(obj) = value.as_object() {
        if let Some(param_path) = obj.get("$param").and_then(Value::as_str) {
            if let Some(rest) = param_path.strip_prefix("parent.") {
                let Some(ctx) = context else {
                    return Err(EngineError::Eval(
                        "parent reference outside a subquery".to_string(),
                    ));
                };
                return Ok(resolve_nested_value(Some(ctx), &Path::new(rest))
                    .cloned()
                    .map(normalize_record_id));
            }

            let resolved = params
                .and_then(|p| resolve_nested_value(Some(p), &Path::new(param_path)))
                .cloned()
                .map(normalize_record_id);
            return match resolved {
                Some(v) => Ok(Some(v)),
                None => Err(EngineError::Eval(format!(
                    "missing bound parameter ${}",
                    param_path
                ))),
            };
        }
    }
    Ok(Some(normalize_record_id(Datum::from(value.clone()))))
}

/// Resolve a dot path inside a nested value.
pub fn resolve_nested_value<'a>(root: Option<&'a Datum>, path: &Path) -> Option<&'a Datum> {
    let mut current = root;
    for part in path.segments() {
        match current {
            Some(Datum::Object(map)) => current = map.get(part),
            _ => return None,
        }
    }
    current
}

/// Total order over datums, used for predicates and ORDER BY.
pub fn compare_datums(a: Option<&Datum>, b: Option<&Datum>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(va), Some(vb)) => match (va, vb) {
            (Datum::Null, Datum::Null) => Ordering::Equal,
            (Datum::Bool(ba), Datum::Bool(bb)) => ba.cmp(bb),
            (Datum::Number(na), Datum::Number(nb)) => {
                na.partial_cmp(nb).unwrap_or(Ordering::Equal)
            }
            (Datum::Str(sa), Datum::Str(sb)) => sa.cmp(sb),
            (Datum::Array(aa), Datum::Array(ab)) => {
                let len_cmp = aa.len().cmp(&ab.len());
                if len_cmp != Ordering::Equal {
                    return len_cmp;
                }
                for (ia, ib) in aa.iter().zip(ab.iter()) {
                    let cmp = compare_datums(Some(ia), Some(ib));
                    if cmp != Ordering::Equal {
                        return cmp;
                    }
                }
                Ordering::Equal
            }
            (Datum::Object(oa), Datum::Object(ob)) => oa.len().cmp(&ob.len()),
            _ => type_rank(va).cmp(&type_rank(vb)),
        },
    }
}

fn type_rank(v: &Datum) -> u8 {
    match v {
        Datum::Null => 0,
        Datum::Bool(_) => 1,
        Datum::Number(_) => 2,
        Datum::Str(_) => 3,
        Datum::Array(_) => 4,
        Datum::Object(_) => 5,
    }
}
