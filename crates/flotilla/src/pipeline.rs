//! Grouping and ordering of fan-out results.
//!
//! Consumes a stage channel of [`Element`]s and produces deterministic
//! [`ResultRow`]s: optionally grouped by one dotted path, ordered by a
//! sequence of dotted paths, with the synthetic keys `host` (host project)
//! and `count` (group size) available everywhere a field path is.
//!
//! Ordering rules, applied to the primary key with the remaining keys as
//! tie-breakers:
//! - `host` orders rows by the lexicographically first host project of the
//!   row's elements;
//! - `count` orders rows by group size, tie-broken by the group key
//!   ascending; without grouping every count is 1 and the pass is stable;
//! - any other key orders grouped rows by their group key and singleton rows
//!   by the field value, case-insensitively.
//!
//! `desc` (the default) is the natural direction; `asc` reverses the final
//! order. Row order depends only on the input multi-set and the options,
//! never on element arrival order.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::fanout::Element;
use crate::index::{self, StructIndex, Structural, COUNT_KEY, HOST_KEY};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl std::str::FromStr for SortOrder {
    type Err = Error;

    fn from_str(s: &str) -> Result<SortOrder> {
        match s {
            "asc" => Ok(SortOrder::Asc),
            "desc" => Ok(SortOrder::Desc),
            other => Err(Error::config(format!("invalid sort order {other:?}"))),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Options {
    pub group_by: Option<String>,
    pub order_by: Vec<String>,
    pub sort: SortOrder,
}

impl Options {
    /// Check every path against the payload type. Runs before any element
    /// is drained so a typo fails fast.
    pub fn validate<T: Structural>(&self) -> Result<StructIndex> {
        if self.order_by.is_empty() {
            return Err(Error::config("order_by must name at least one field"));
        }
        let index = StructIndex::of::<T>();
        index.require(&self.order_by)?;
        if let Some(group_by) = &self.group_by {
            index.require(std::slice::from_ref(group_by))?;
        }
        Ok(index)
    }
}

/// One output row: the group (or singleton) key, its elements, and the
/// AND of their cached flags.
#[derive(Debug)]
pub struct ResultRow<T> {
    pub count: usize,
    pub key: String,
    pub elements: Vec<Element<T>>,
    pub cached: bool,
}

impl<T> ResultRow<T> {
    /// Sorted short names of the hosts behind this row.
    pub fn host_projects(&self, all: bool) -> Vec<String> {
        let hosts: crate::hosts::Hosts = self.elements.iter().map(|e| e.host.clone()).collect();
        hosts.projects(all)
    }
}

/// Drain a stage channel and produce ordered rows.
pub async fn from_channel<T: Structural>(
    rx: mpsc::Receiver<Element<T>>,
    opts: &Options,
) -> Result<Vec<ResultRow<T>>> {
    opts.validate::<T>()?;
    let elements = crate::fanout::collect(rx).await;
    rows_from(elements, opts)
}

/// Group and order an already-drained buffer.
pub fn from_elements<T: Structural>(
    elements: Vec<Element<T>>,
    opts: &Options,
) -> Result<Vec<ResultRow<T>>> {
    opts.validate::<T>()?;
    rows_from(elements, opts)
}

struct Row<T> {
    key: String,
    grouped: bool,
    elements: Vec<Element<T>>,
    values: Vec<Value>,
}

fn rows_from<T: Structural>(elements: Vec<Element<T>>, opts: &Options) -> Result<Vec<ResultRow<T>>> {
    let values: Vec<Value> = elements
        .iter()
        .map(|e| serde_json::to_value(&e.payload).map_err(|err| Error::validation(err.to_string())))
        .collect::<Result<_>>()?;

    let mut rows: Vec<Row<T>> = match &opts.group_by {
        Some(group_by) => {
            // BTreeMap gives a stable starting order regardless of arrival.
            let mut groups: BTreeMap<String, Row<T>> = BTreeMap::new();
            for (element, value) in elements.into_iter().zip(values) {
                let key = index::lookup(&value, group_by)
                    .map(index::value_string)
                    .unwrap_or_default();
                let row = groups.entry(key.clone()).or_insert_with(|| Row {
                    key,
                    grouped: true,
                    elements: Vec::new(),
                    values: Vec::new(),
                });
                row.elements.push(element);
                row.values.push(value);
            }
            groups.into_values().collect()
        }
        None => elements
            .into_iter()
            .zip(values)
            .map(|(element, value)| {
                let key = singleton_key(&element, &value, &opts.order_by);
                Row {
                    key,
                    grouped: false,
                    elements: vec![element],
                    values: vec![value],
                }
            })
            .collect(),
    };

    sort_rows(&mut rows, opts);

    if opts.sort == SortOrder::Asc {
        rows.reverse();
    }

    Ok(rows
        .into_iter()
        .map(|row| ResultRow {
            count: row.elements.len(),
            cached: !row.elements.is_empty() && row.elements.iter().all(|e| e.cached),
            key: row.key,
            elements: row.elements,
        })
        .collect())
}

/// The display key of an ungrouped element: the host project for `host`,
/// else the first ordering field present on the instance (`count` carries no
/// instance value and is skipped).
fn singleton_key<T>(element: &Element<T>, value: &Value, order_by: &[String]) -> String {
    if order_by.first().map(String::as_str) == Some(HOST_KEY) {
        return element.host.project.clone();
    }
    for key in order_by {
        if key == COUNT_KEY || key == HOST_KEY {
            continue;
        }
        if let Some(v) = index::lookup(value, key) {
            return index::value_string(v);
        }
    }
    String::new()
}

fn sort_rows<T>(rows: &mut [Row<T>], opts: &Options) {
    let order_by = &opts.order_by;
    rows.sort_by(|a, b| {
        for (i, key) in order_by.iter().enumerate() {
            let ord = match key.as_str() {
                COUNT_KEY => {
                    // Group size descending; equal sizes resolve by the
                    // group key ascending. Singleton counts are all 1.
                    let by_len = b.elements.len().cmp(&a.elements.len());
                    if a.grouped && i == 0 {
                        by_len.then_with(|| a.key.cmp(&b.key))
                    } else {
                        by_len
                    }
                }
                HOST_KEY => host_value(b).cmp(&host_value(a)),
                field => {
                    if a.grouped {
                        cmp_ci(&b.key, &a.key)
                    } else {
                        field_value(b, field).cmp(&field_value(a, field))
                    }
                }
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        // Stable final tie-break: arrival order must never show through.
        a.key.cmp(&b.key)
    });
}

/// The lexicographically first host project of a row.
fn host_value<T>(row: &Row<T>) -> String {
    row.elements
        .iter()
        .map(|e| e.host.project.clone())
        .min()
        .unwrap_or_default()
}

/// A field value as a sort key: numbers compare numerically, strings
/// case-insensitively, absent values sort last.
fn field_value<T>(row: &Row<T>, path: &str) -> SortVal {
    row.values
        .first()
        .and_then(|v| index::lookup(v, path))
        .map(SortVal::from)
        .unwrap_or(SortVal::Missing)
}

#[derive(Debug, PartialEq)]
enum SortVal {
    Missing,
    Num(f64),
    Str(String),
}

impl From<&Value> for SortVal {
    fn from(value: &Value) -> SortVal {
        match value {
            Value::Number(n) => n
                .as_f64()
                .map(SortVal::Num)
                .unwrap_or_else(|| SortVal::Str(n.to_string())),
            other => SortVal::Str(index::value_string(other)),
        }
    }
}

impl Eq for SortVal {}

impl PartialOrd for SortVal {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SortVal {
    fn cmp(&self, other: &Self) -> Ordering {
        use SortVal::*;
        match (self, other) {
            (Missing, Missing) => Ordering::Equal,
            (Missing, _) => Ordering::Less,
            (_, Missing) => Ordering::Greater,
            (Num(a), Num(b)) => a.partial_cmp(b).unwrap_or(Ordering::Equal),
            (Num(a), Str(b)) => cmp_ci(&a.to_string(), b),
            (Str(a), Num(b)) => cmp_ci(a, &b.to_string()),
            (Str(a), Str(b)) => cmp_ci(a, b),
        }
    }
}

fn cmp_ci(a: &str, b: &str) -> Ordering {
    a.to_lowercase()
        .cmp(&b.to_lowercase())
        .then_with(|| a.cmp(b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gitlab::types::{Project, User};
    use crate::hosts::test_host;

    fn user(username: &str, email: Option<&str>) -> User {
        User {
            id: 1,
            username: username.to_string(),
            name: username.to_string(),
            email: email.map(str::to_string),
            ..Default::default()
        }
    }

    fn element<T>(host_name: &str, payload: T, cached: bool) -> Element<T> {
        Element {
            host: test_host("team", "main", host_name),
            payload,
            cached,
        }
    }

    fn project(name: &str) -> Project {
        Project {
            id: 1,
            name: name.to_string(),
            web_url: format!("https://gl/{name}"),
            ..Default::default()
        }
    }

    #[test]
    fn same_user_on_two_hosts_yields_two_singleton_rows() {
        let elements = vec![
            element("beta", user("testuser2", None), false),
            element("alpha", user("testuser2", None), false),
        ];
        let opts = Options {
            order_by: vec!["username".to_string()],
            ..Default::default()
        };

        let rows = from_elements(elements, &opts).unwrap();
        assert_eq!(rows.len(), 2);
        for row in &rows {
            assert_eq!(row.count, 1);
            assert_eq!(row.key, "testuser2");
            assert!(!row.cached);
        }
    }

    #[test]
    fn grouping_partitions_without_loss_or_duplication() {
        let elements = vec![
            element("alpha", user("a", None), false),
            element("beta", user("a", None), false),
            element("alpha", user("b", None), false),
            element("gamma", user("c", None), false),
        ];
        let opts = Options {
            group_by: Some("username".to_string()),
            order_by: vec!["count".to_string(), "username".to_string()],
            ..Default::default()
        };

        let rows = from_elements(elements, &opts).unwrap();
        let total: usize = rows.iter().map(|r| r.elements.len()).sum();
        assert_eq!(total, 4);

        let mut keys: Vec<&str> = rows.iter().map(|r| r.key.as_str()).collect();
        keys.sort_unstable();
        assert_eq!(keys, vec!["a", "b", "c"]);
        let a_row = rows.iter().find(|r| r.key == "a").unwrap();
        assert_eq!(a_row.count, 2);
    }

    #[test]
    fn count_orders_desc_with_key_asc_tiebreak() {
        // Groups: a:3, b:3, c:1 -> a, b, c under desc.
        let mut elements = Vec::new();
        for (name, copies) in [("b", 3), ("c", 1), ("a", 3)] {
            for i in 0..copies {
                elements.push(element(&format!("h{name}{i}"), project(name), false));
            }
        }
        let opts = Options {
            group_by: Some("name".to_string()),
            order_by: vec!["count".to_string(), "name".to_string()],
            sort: SortOrder::Desc,
        };

        let rows = from_elements(elements, &opts).unwrap();
        let keys: Vec<&str> = rows.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
        assert_eq!(
            rows.iter().map(|r| r.count).collect::<Vec<_>>(),
            vec![3, 3, 1]
        );
    }

    #[test]
    fn asc_reverses_the_final_order() {
        let elements = vec![
            element("h1", project("a"), false),
            element("h2", project("a"), false),
            element("h3", project("b"), false),
        ];
        let opts = Options {
            group_by: Some("name".to_string()),
            order_by: vec!["count".to_string(), "name".to_string()],
            sort: SortOrder::Asc,
        };

        let rows = from_elements(elements, &opts).unwrap();
        let keys: Vec<&str> = rows.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["b", "a"]);
    }

    #[test]
    fn cached_is_the_and_of_element_flags() {
        let elements = vec![
            element("alpha", user("a", None), true),
            element("beta", user("a", None), true),
            element("alpha", user("b", None), true),
            element("beta", user("b", None), false),
        ];
        let opts = Options {
            group_by: Some("username".to_string()),
            order_by: vec!["username".to_string()],
            ..Default::default()
        };

        let rows = from_elements(elements, &opts).unwrap();
        let a = rows.iter().find(|r| r.key == "a").unwrap();
        let b = rows.iter().find(|r| r.key == "b").unwrap();
        assert!(a.cached);
        assert!(!b.cached);
    }

    #[test]
    fn output_is_independent_of_arrival_order() {
        let base = vec![
            element("h1", project("zeta"), false),
            element("h2", project("alpha"), true),
            element("h3", project("alpha"), false),
            element("h4", project("midway"), false),
        ];
        let opts = Options {
            group_by: Some("name".to_string()),
            order_by: vec!["count".to_string(), "name".to_string()],
            ..Default::default()
        };

        let keys_of = |elements: Vec<Element<Project>>| {
            from_elements(elements, &opts)
                .unwrap()
                .into_iter()
                .map(|r| r.key)
                .collect::<Vec<_>>()
        };

        let forward = keys_of(base.clone());
        let reversed = keys_of(base.into_iter().rev().collect());
        assert_eq!(forward, reversed);
        assert_eq!(forward, vec!["alpha", "midway", "zeta"]);
    }

    #[test]
    fn host_key_orders_by_host_project() {
        let e1 = Element {
            host: test_host("team", "zz", "one"),
            payload: user("u", None),
            cached: false,
        };
        let e2 = Element {
            host: test_host("team", "aa", "two"),
            payload: user("u", None),
            cached: false,
        };
        let opts = Options {
            order_by: vec![HOST_KEY.to_string()],
            sort: SortOrder::Asc,
            ..Default::default()
        };

        let rows = from_elements(vec![e1, e2], &opts).unwrap();
        let keys: Vec<&str> = rows.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["aa", "zz"]);
    }

    #[test]
    fn singleton_key_takes_first_present_field() {
        let elements = vec![element(
            "alpha",
            user("fallback", None), // email is absent
            false,
        )];
        let opts = Options {
            order_by: vec!["email".to_string(), "username".to_string()],
            ..Default::default()
        };

        let rows = from_elements(elements, &opts).unwrap();
        assert_eq!(rows[0].key, "fallback");
    }

    #[test]
    fn unknown_paths_fail_before_draining() {
        let opts = Options {
            order_by: vec!["nonexistent_field".to_string()],
            ..Default::default()
        };
        let err = opts.validate::<User>().unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let grouped = Options {
            group_by: Some("bogus".to_string()),
            order_by: vec!["username".to_string()],
            ..Default::default()
        };
        assert!(grouped.validate::<User>().is_err());

        let empty = Options::default();
        assert!(empty.validate::<User>().is_err());
    }

    #[tokio::test]
    async fn from_channel_drains_and_orders() {
        let (tx, rx) = crate::fanout::stage_channel::<User>();
        tokio::spawn(async move {
            for name in ["carol", "alice", "bob"] {
                let _ = tx
                    .send(element("alpha", user(name, None), false))
                    .await;
            }
        });

        let opts = Options {
            order_by: vec!["username".to_string()],
            sort: SortOrder::Asc,
            ..Default::default()
        };
        let rows = from_channel(rx, &opts).await.unwrap();
        let keys: Vec<&str> = rows.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["alice", "bob", "carol"]);
    }

    #[test]
    fn sort_values_compare_numbers_numerically() {
        assert!(SortVal::Num(9.0) < SortVal::Num(10.0));
        assert_eq!(
            SortVal::from(&serde_json::json!("Alpha")).cmp(&SortVal::from(&serde_json::json!(
                "alpha"
            ))),
            Ordering::Less
        );
        assert!(SortVal::Missing < SortVal::Num(0.0));
    }
}
