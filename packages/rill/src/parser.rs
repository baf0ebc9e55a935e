//! Query text front end.
//!
//! Parses the supported SELECT dialect into an [`Operator`] plan:
//!
//! ```text
//! SELECT <fields | *> [, (SELECT … FROM child WHERE fk = $parent.f)[0] AS alias]*
//! FROM table
//! [WHERE cond [AND|OR cond]*]
//! [ORDER BY field [ASC|DESC], …]
//! [LIMIT n]
//! ```
//!
//! `$name` references resolve against the bound params; `$parent.field`
//! references resolve against the correlated outer row.

use crate::engine::operators::{Operator, OrderSpec, Predicate, Projection};
use crate::engine::types::Path;
use crate::error::EngineError;
use nom::{
    branch::alt,
    bytes::complete::{is_not, tag, tag_no_case, take_while1},
    character::complete::{char, digit1, multispace0, multispace1},
    combinator::{map, map_res, opt, recognize},
    multi::separated_list1,
    sequence::{delimited, preceded, tuple},
    IResult,
};
use serde_json::{json, Value};

/// Parse a query into an operator plan.
pub fn parse_query(sql: &str) -> Result<Operator, EngineError> {
    let clean = sql.trim().trim_end_matches(';').trim_end();
    match parse_select(clean) {
        Ok((rest, parsed)) if rest.trim().is_empty() => Ok(build_plan(parsed)),
        Ok((rest, _)) => Err(EngineError::InvalidQuery(format!(
            "unexpected trailing input: {:?}",
            rest.trim()
        ))),
        Err(e) => Err(EngineError::InvalidQuery(e.to_string())),
    }
}

/// Static inspection: every table the query reads, subquery targets
/// included.
pub fn involved_tables(sql: &str) -> Result<Vec<String>, EngineError> {
    Ok(parse_query(sql)?.referenced_tables())
}

// --- intermediate shapes ---

struct ParsedQuery {
    items: Vec<SelectItem>,
    table: String,
    predicate: Option<Predicate>,
    order_by: Option<Vec<OrderSpec>>,
    limit: Option<usize>,
}

enum SelectItem {
    Star,
    Field(String),
    Subquery {
        alias: String,
        first: bool,
        plan: Box<Operator>,
    },
}

#[derive(Debug, Clone)]
enum PValue {
    Json(Value),
    Prefix(String),
}

// --- nom helpers ---

fn ws<'a, F, O, E: nom::error::ParseError<&'a str>>(
    inner: F,
) -> impl FnMut(&'a str) -> IResult<&'a str, O, E>
where
    F: FnMut(&'a str) -> IResult<&'a str, O, E>,
{
    delimited(multispace0, inner, multispace0)
}

// Identifiers: user, thread:t, address.city
fn identifier(input: &str) -> IResult<&str, String> {
    map(
        take_while1(|c: char| c.is_alphanumeric() || c == '_' || c == ':' || c == '.'),
        |s: &str| s.to_string(),
    )(input)
}

fn string_literal(input: &str) -> IResult<&str, PValue> {
    let quoted = |delim: char| {
        delimited(
            char(delim),
            is_not(if delim == '\'' { "'" } else { "\"" }),
            char(delim),
        )
    };
    map(alt((quoted('\''), quoted('"'))), |s: &str| {
        if let Some(stem) = s.strip_suffix('*') {
            PValue::Prefix(stem.to_string())
        } else {
            PValue::Json(json!(s))
        }
    })(input)
}

fn number(input: &str) -> IResult<&str, PValue> {
    map_res(
        recognize(tuple((
            opt(char('-')),
            digit1,
            opt(tuple((char('.'), digit1))),
        ))),
        |s: &str| s.parse::<f64>().map(|n| PValue::Json(json!(n))),
    )(input)
}

fn value_entry(input: &str) -> IResult<&str, PValue> {
    alt((
        string_literal,
        map(preceded(char('$'), identifier), |s| {
            PValue::Json(json!({ "$param": s }))
        }),
        number,
        map(identifier, |s| match s.as_str() {
            "true" | "TRUE" => PValue::Json(json!(true)),
            "false" | "FALSE" => PValue::Json(json!(false)),
            "null" | "NULL" | "NONE" => PValue::Json(Value::Null),
            _ => PValue::Json(json!(s)),
        }),
    ))(input)
}

// --- WHERE logic ---

fn comparison_op(input: &str) -> IResult<&str, &str> {
    alt((
        tag("!="),
        tag(">="),
        tag("<="),
        tag("="),
        tag(">"),
        tag("<"),
    ))(input)
}

fn comparison(input: &str) -> IResult<&str, Predicate> {
    let (input, (field, op, value)) =
        tuple((ws(identifier), ws(comparison_op), ws(value_entry)))(input)?;

    let field = Path::new(&field);
    let pred = match (op, value) {
        ("=", PValue::Prefix(prefix)) => Predicate::Prefix { field, prefix },
        // A prefix pattern with any other operator degrades to a plain
        // string comparison including the '*'.
        (op, PValue::Prefix(p)) => build_cmp(op, field, json!(format!("{}*", p))),
        (op, PValue::Json(value)) => build_cmp(op, field, value),
    };
    Ok((input, pred))
}

fn build_cmp(op: &str, field: Path, value: Value) -> Predicate {
    match op {
        "=" => Predicate::Eq { field, value },
        "!=" => Predicate::Neq { field, value },
        ">" => Predicate::Gt { field, value },
        ">=" => Predicate::Gte { field, value },
        "<" => Predicate::Lt { field, value },
        "<=" => Predicate::Lte { field, value },
        _ => unreachable!("comparison_op yields a fixed set"),
    }
}

fn and_clause(input: &str) -> IResult<&str, Predicate> {
    map(
        separated_list1(ws(tag_no_case("AND")), comparison),
        |mut preds| {
            if preds.len() == 1 {
                preds.remove(0)
            } else {
                Predicate::And { predicates: preds }
            }
        },
    )(input)
}

fn where_clause(input: &str) -> IResult<&str, Predicate> {
    map(
        preceded(
            ws(tag_no_case("WHERE")),
            separated_list1(ws(tag_no_case("OR")), and_clause),
        ),
        |mut groups| {
            if groups.len() == 1 {
                groups.remove(0)
            } else {
                Predicate::Or { predicates: groups }
            }
        },
    )(input)
}

// --- ORDER BY / LIMIT ---

fn order_clause(input: &str) -> IResult<&str, Vec<OrderSpec>> {
    let single = map(
        tuple((
            ws(identifier),
            opt(ws(alt((tag_no_case("ASC"), tag_no_case("DESC"))))),
        )),
        |(field, dir)| OrderSpec {
            field: Path::new(&field),
            direction: dir.unwrap_or("ASC").to_uppercase(),
        },
    );
    preceded(
        ws(tag_no_case("ORDER BY")),
        separated_list1(ws(char(',')), single),
    )(input)
}

fn limit_clause(input: &str) -> IResult<&str, usize> {
    preceded(
        ws(tag_no_case("LIMIT")),
        ws(map_res(digit1, |s: &str| s.parse::<usize>())),
    )(input)
}

// --- SELECT ---

fn subquery_item(input: &str) -> IResult<&str, SelectItem> {
    let (input, parsed) = delimited(ws(char('(')), parse_select, ws(char(')')))(input)?;
    let (input, first) = opt(ws(tag("[0]")))(input)?;
    let (input, _) = ws(tag_no_case("AS"))(input)?;
    let (input, alias) = identifier(input)?;
    Ok((
        input,
        SelectItem::Subquery {
            alias,
            first: first.is_some(),
            plan: Box::new(build_plan(parsed)),
        },
    ))
}

fn select_item(input: &str) -> IResult<&str, SelectItem> {
    alt((
        subquery_item,
        map(tag("*"), |_| SelectItem::Star),
        map(identifier, SelectItem::Field),
    ))(input)
}

fn parse_select(input: &str) -> IResult<&str, ParsedQuery> {
    let (input, _) = ws(tag_no_case("SELECT"))(input)?;
    let (input, items) = separated_list1(ws(char(',')), select_item)(input)?;
    let (input, _) = multispace1(input)?;
    let (input, _) = tag_no_case("FROM")(input)?;
    let (input, _) = multispace1(input)?;
    let (input, table) = identifier(input)?;
    let (input, predicate) = opt(ws(where_clause))(input)?;
    let (input, order_by) = opt(ws(order_clause))(input)?;
    let (input, limit) = opt(ws(limit_clause))(input)?;

    Ok((
        input,
        ParsedQuery {
            items,
            table,
            predicate,
            order_by,
            limit,
        },
    ))
}

fn build_plan(parsed: ParsedQuery) -> Operator {
    let mut op = Operator::Scan {
        table: parsed.table,
    };

    if let Some(predicate) = parsed.predicate {
        op = Operator::Filter {
            input: Box::new(op),
            predicate,
        };
    }

    // A bare `SELECT *` needs no projection node.
    let bare_star = parsed.items.len() == 1 && matches!(parsed.items[0], SelectItem::Star);
    if !bare_star {
        let projections = parsed
            .items
            .into_iter()
            .map(|item| match item {
                SelectItem::Star => Projection::All,
                SelectItem::Field(name) => Projection::Field {
                    name: Path::new(&name),
                },
                SelectItem::Subquery { alias, first, plan } => {
                    Projection::Subquery { alias, first, plan }
                }
            })
            .collect();
        op = Operator::Project {
            input: Box::new(op),
            projections,
        };
    }

    if parsed.limit.is_some() || parsed.order_by.is_some() {
        op = Operator::Limit {
            input: Box::new(op),
            limit: parsed.limit,
            order_by: parsed.order_by,
        };
    }

    op
}
