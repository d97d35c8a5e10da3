//! Relation conditions and their SPARQL rendering.
//!
//! A [`RelationCondition`] is the AST of a single triple constraint
//! `subject -relation-> object`. Every query the remote backend sends is
//! built from these through [`RelationCondition::render`]; the local backend
//! evaluates the same values directly against its edge lists.

use serde::{Deserialize, Serialize};

use super::{EntityId, Namespace};

/// Constraint `subject -relation-> object` with optionally free endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RelationCondition {
    pub subject: Option<EntityId>,
    pub relation: Option<EntityId>,
    pub object: Option<EntityId>,
    /// Also match with subject and object swapped.
    pub invertible: bool,
}

impl RelationCondition {
    /// `?x -relation-> object` with a free subject.
    pub fn to_object(relation: EntityId, object: EntityId) -> Self {
        Self {
            subject: None,
            relation: Some(relation),
            object: Some(object),
            invertible: false,
        }
    }

    /// Same condition, also matching the swapped direction.
    pub fn inverted(mut self) -> Self {
        self.invertible = true;
        self
    }

    pub fn with_subject(mut self, subject: EntityId) -> Self {
        self.subject = Some(subject);
        self
    }

    /// Whether the union-with-inverse form applies.
    pub fn renders_union(&self) -> bool {
        self.invertible && self.object.is_some_and(|o| o.is_item())
    }

    /// Render as a graph-pattern clause.
    ///
    /// Free endpoints take the supplied variable names. With `full_clause`
    /// the result ends in `.` and can be stacked conjunctively; without it
    /// the result is a `{…}` group usable as a `UNION` operand.
    pub fn render(
        &self,
        subject_var: &str,
        relation_var: &str,
        object_var: &str,
        full_clause: bool,
    ) -> String {
        let subject = render_endpoint(self.subject, subject_var);
        let relation = render_endpoint(self.relation, relation_var);
        let object = render_endpoint(self.object, object_var);

        let forward = format!("{subject} {relation} {object}");
        let body = if self.renders_union() {
            let swapped = format!("{object} {relation} {subject}");
            format!("{{{forward}}} UNION {{{swapped}}}")
        } else if full_clause {
            forward
        } else {
            format!("{{{forward}}}")
        };

        if full_clause { format!("{body}.") } else { body }
    }
}

fn render_endpoint(id: Option<EntityId>, var: &str) -> String {
    match id {
        None => var.to_string(),
        Some(id) => match id.namespace {
            Namespace::Property => format!("wdt:{id}"),
            Namespace::Item => format!("wd:{id}"),
        },
    }
}

/// Render a condition block: conjunctive (newline-joined full clauses) or
/// disjunctive (`UNION`-joined groups).
pub fn render_conditions(
    conditions: &[RelationCondition],
    subject_var: &str,
    relation_var: &str,
    match_all: bool,
) -> String {
    let clauses: Vec<String> = conditions
        .iter()
        .map(|c| c.render(subject_var, relation_var, "?condition_object", match_all))
        .collect();
    if match_all {
        clauses.join("\n")
    } else {
        clauses.join(" UNION ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn p17_q30() -> RelationCondition {
        RelationCondition::to_object(EntityId::property(17), EntityId::item(30))
    }

    #[test]
    fn test_forward_full_clause() {
        let rendered = p17_q30().render("?object", "?p", "?o", true);
        assert_eq!(rendered, "?object wdt:P17 wd:Q30.");
    }

    #[test]
    fn test_forward_disjunct_is_a_group() {
        let rendered = p17_q30().render("?object", "?p", "?o", false);
        assert_eq!(rendered, "{?object wdt:P17 wd:Q30}");
    }

    #[test]
    fn test_invertible_renders_union() {
        let cond = p17_q30().inverted();
        assert_eq!(
            cond.render("?object", "?p", "?o", true),
            "{?object wdt:P17 wd:Q30} UNION {wd:Q30 wdt:P17 ?object}."
        );
        assert_eq!(
            cond.render("?object", "?p", "?o", false),
            "{?object wdt:P17 wd:Q30} UNION {wd:Q30 wdt:P17 ?object}"
        );
    }

    #[test]
    fn test_invertible_without_bound_object_stays_forward() {
        let cond = RelationCondition {
            subject: None,
            relation: Some(EntityId::property(31)),
            object: None,
            invertible: true,
        };
        assert_eq!(cond.render("?s", "?p", "?o", true), "?s wdt:P31 ?o.");
    }

    #[test]
    fn test_free_relation_uses_variable() {
        let cond = RelationCondition {
            subject: Some(EntityId::item(61)),
            relation: None,
            object: Some(EntityId::item(30)),
            invertible: false,
        };
        assert_eq!(cond.render("?s", "?rel", "?o", true), "wd:Q61 ?rel wd:Q30.");
    }

    #[test]
    fn test_condition_block_joins() {
        let a = p17_q30().inverted();
        let b = RelationCondition::to_object(EntityId::property(31), EntityId::item(515));

        let all = render_conditions(&[a, b], "?object", "?cp", true);
        assert_eq!(
            all,
            "{?object wdt:P17 wd:Q30} UNION {wd:Q30 wdt:P17 ?object}.\n?object wdt:P31 wd:Q515."
        );

        let any = render_conditions(&[a, b], "?object", "?cp", false);
        assert_eq!(
            any,
            "{?object wdt:P17 wd:Q30} UNION {wd:Q30 wdt:P17 ?object} UNION {?object wdt:P31 wd:Q515}"
        );
    }
}
