//! Non-blocking shape checks for extracted results.
//!
//! The system prompts document cardinality bounds, enum domains, and
//! numeric ranges. Models do not always honour them. These checks report
//! each deviation as a [`ShapeWarning`] and never alter or reject the
//! result: a result with four suggestions is kept with four suggestions.

use std::collections::HashSet;
use std::fmt;
use std::ops::RangeInclusive;

use crate::models::{
    AnalysisResult, NarrativeRole, RelationAnalysisResult, RelationType, ThemeLevel,
};

/// One deviation from the documented result shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShapeWarning {
    /// JSON-pointer-like location, e.g. `relations[2].strength`.
    pub path: String,
    pub message: String,
}

impl fmt::Display for ShapeWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Implemented by result shapes that carry documented constraints.
pub trait ShapeCheck {
    fn shape_warnings(&self) -> Vec<ShapeWarning>;
}

#[derive(Default)]
struct Warnings(Vec<ShapeWarning>);

impl Warnings {
    fn push(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.0.push(ShapeWarning {
            path: path.into(),
            message: message.into(),
        });
    }

    fn count(&mut self, path: &str, len: usize, bounds: RangeInclusive<usize>) {
        if !bounds.contains(&len) {
            self.push(
                path,
                format!(
                    "expected {}..={} entries, got {}",
                    bounds.start(),
                    bounds.end(),
                    len
                ),
            );
        }
    }

    fn unit(&mut self, path: String, value: f64) {
        if !(0.0..=1.0).contains(&value) {
            self.push(path, format!("expected a value in [0, 1], got {}", value));
        }
    }
}

impl ShapeCheck for AnalysisResult {
    fn shape_warnings(&self) -> Vec<ShapeWarning> {
        let mut w = Warnings::default();
        w.count("groups", self.groups.len(), 1..=5);
        for (i, group) in self.groups.iter().enumerate() {
            if group.fragment_ids.len() < 2 {
                w.push(
                    format!("groups[{}].fragmentIds", i),
                    "expected at least 2 fragment ids",
                );
            }
        }
        if self.suggestions.len() != 3 {
            w.push(
                "suggestions",
                format!("expected exactly 3 entries, got {}", self.suggestions.len()),
            );
        }
        w.0
    }
}

impl ShapeCheck for RelationAnalysisResult {
    fn shape_warnings(&self) -> Vec<ShapeWarning> {
        let mut w = Warnings::default();

        w.count("relations", self.relations.len(), 1..=20);
        for (i, rel) in self.relations.iter().enumerate() {
            if rel.relation_type == RelationType::Unknown {
                w.push(format!("relations[{}].relation_type", i), "unknown relation type");
            }
            w.unit(format!("relations[{}].strength", i), rel.strength);
            w.unit(format!("relations[{}].ai_confidence", i), rel.ai_confidence);
        }

        w.count("groups", self.groups.len(), 1..=8);
        for (i, group) in self.groups.iter().enumerate() {
            w.count(
                &format!("groups[{}].fragment_ids", i),
                group.fragment_ids.len(),
                2..=10,
            );
            w.unit(format!("groups[{}].confidence", i), group.confidence);
        }

        for (i, event) in self.timeline.events.iter().enumerate() {
            let expected = i as i64 + 1;
            if event.position != expected {
                w.push(
                    format!("timeline.events[{}].position", i),
                    format!("expected {}, got {}", expected, event.position),
                );
            }
            if event.narrative_role == NarrativeRole::Unknown {
                w.push(
                    format!("timeline.events[{}].narrative_role", i),
                    "unknown narrative role",
                );
            }
        }

        w.count("themes", self.themes.len(), 1..=10);
        let levels: HashSet<ThemeLevel> = self.themes.iter().map(|t| t.level).collect();
        for level in [ThemeLevel::Primary, ThemeLevel::Secondary, ThemeLevel::Tertiary] {
            if !self.themes.is_empty() && !levels.contains(&level) {
                w.push("themes", format!("no {:?} theme", level).to_lowercase());
            }
        }
        for (i, theme) in self.themes.iter().enumerate() {
            if theme.level == ThemeLevel::Unknown {
                w.push(format!("themes[{}].level", i), "unknown theme level");
            }
            if theme.heat_score < 1 {
                w.push(
                    format!("themes[{}].heat_score", i),
                    "expected a positive integer",
                );
            }
        }

        w.count("suggestions", self.suggestions.len(), 1..=10);
        for (i, s) in self.suggestions.iter().enumerate() {
            if s.confidence <= 0.7 {
                w.push(
                    format!("suggestions[{}].confidence", i),
                    format!("expected > 0.7, got {}", s.confidence),
                );
            }
        }

        w.0
    }
}

/// Reports a timeline that does not cover every analysed fragment once.
pub fn timeline_coverage(
    result: &RelationAnalysisResult,
    fragment_count: usize,
) -> Option<ShapeWarning> {
    let events = result.timeline.events.len();
    if events == fragment_count {
        return None;
    }
    Some(ShapeWarning {
        path: "timeline.events".to_string(),
        message: format!("expected {} events, got {}", fragment_count, events),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        AnalysisGroup, Relation, RelationSuggestion, ThemeCluster, TimelineEvent,
    };

    fn conforming_simple() -> AnalysisResult {
        AnalysisResult {
            groups: vec![AnalysisGroup {
                label: "The folded afternoon".into(),
                fragment_ids: vec!["a".into(), "b".into()],
            }],
            suggestions: vec!["one".into(), "two".into(), "three".into()],
        }
    }

    #[test]
    fn test_conforming_simple_result_has_no_warnings() {
        assert!(conforming_simple().shape_warnings().is_empty());
    }

    #[test]
    fn test_four_suggestions_warns_without_truncating() {
        let mut result = conforming_simple();
        result.suggestions.push("four".into());
        let warnings = result.shape_warnings();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].path, "suggestions");
        assert_eq!(result.suggestions.len(), 4);
    }

    #[test]
    fn test_single_fragment_group_warns() {
        let mut result = conforming_simple();
        result.groups[0].fragment_ids.pop();
        let warnings = result.shape_warnings();
        assert_eq!(warnings[0].path, "groups[0].fragmentIds");
    }

    #[test]
    fn test_relation_ranges_and_domains() {
        let result = RelationAnalysisResult {
            relations: vec![Relation {
                source_fragment_id: "a".into(),
                target_fragment_id: "b".into(),
                relation_type: RelationType::Unknown,
                strength: 1.4,
                description: String::new(),
                ai_confidence: 0.5,
            }],
            themes: vec![ThemeCluster {
                name: "loss".into(),
                level: ThemeLevel::Primary,
                heat_score: 0,
                ..Default::default()
            }],
            suggestions: vec![RelationSuggestion {
                confidence: 0.6,
                ..Default::default()
            }],
            ..Default::default()
        };

        let paths: Vec<String> = result.shape_warnings().into_iter().map(|w| w.path).collect();
        assert!(paths.contains(&"relations[0].relation_type".to_string()));
        assert!(paths.contains(&"relations[0].strength".to_string()));
        assert!(!paths.contains(&"relations[0].ai_confidence".to_string()));
        assert!(paths.contains(&"groups".to_string()));
        assert!(paths.contains(&"themes[0].heat_score".to_string()));
        assert!(paths.contains(&"suggestions[0].confidence".to_string()));
        assert_eq!(paths.iter().filter(|p| *p == "themes").count(), 2);
    }

    #[test]
    fn test_timeline_positions_must_be_consecutive() {
        let mut result = RelationAnalysisResult::default();
        result.timeline.events = vec![
            TimelineEvent {
                fragment_id: "a".into(),
                position: 1,
                narrative_role: NarrativeRole::Setup,
                ..Default::default()
            },
            TimelineEvent {
                fragment_id: "b".into(),
                position: 3,
                narrative_role: NarrativeRole::Climax,
                ..Default::default()
            },
        ];
        let warnings = result.shape_warnings();
        assert!(warnings
            .iter()
            .any(|w| w.path == "timeline.events[1].position" && w.message == "expected 2, got 3"));
        assert_eq!(timeline_coverage(&result, 2), None);
        assert!(timeline_coverage(&result, 3).is_some());
    }
}
