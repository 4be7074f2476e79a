use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::hash::Hash;

/// Scale every grade is normalized onto.
pub const GRADE_SCALE: f64 = 20.0;

/// Points assumed for a grade entry that does not carry `totalPoints`.
pub const DEFAULT_TOTAL_POINTS: f64 = 20.0;

/// Built-in assessment label weights, Persian labels first, English aliases after.
pub const DEFAULT_ASSESSMENT_WEIGHTS: [(&str, f64); 10] = [
    ("عالی", 2.0),
    ("خوب", 1.0),
    ("متوسط", 0.0),
    ("ضعیف", -1.0),
    ("بسیار ضعیف", -2.0),
    ("excellent", 2.0),
    ("good", 1.0),
    ("average", 0.0),
    ("weak", -1.0),
    ("very weak", -2.0),
];

/// Label -> weight overrides for one school or teacher.
pub type AssessmentOverrides = HashMap<String, f64>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeEntry {
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_points: Option<f64>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub date: String,
}

impl GradeEntry {
    pub fn points(&self) -> f64 {
        match self.total_points {
            Some(p) if p != 0.0 => p,
            _ => DEFAULT_TOTAL_POINTS,
        }
    }

    /// Same grade as far as deletion is concerned: value, label, date and points.
    pub fn same_grade(&self, other: &GradeEntry) -> bool {
        self.value == other.value
            && self.description == other.description
            && self.date == other.date
            && self.points() == other.points()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssessmentEntry {
    #[serde(default)]
    pub title: String,
    pub value: String,
    #[serde(default)]
    pub date: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WeightSource {
    Explicit,
    Custom,
    Default,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedWeight {
    pub applied_weight: f64,
    pub source: WeightSource,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeDetail {
    #[serde(flatten)]
    pub entry: GradeEntry,
    pub normalized_value: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssessmentDetail {
    #[serde(flatten)]
    pub entry: AssessmentEntry,
    pub applied_weight: f64,
    pub weight_source: WeightSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NoteKind {
    Note,
    DescriptiveStatus,
    PresenceStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthlyNote {
    #[serde(rename = "type")]
    pub kind: NoteKind,
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceDetail {
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_slot: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthlyGradeDetail {
    pub final_score: Option<f64>,
    pub base_grade: Option<f64>,
    pub assessment_adjustment: f64,
    pub grades: Vec<GradeDetail>,
    pub assessments: Vec<AssessmentDetail>,
    pub notes: Vec<MonthlyNote>,
    pub presence: Vec<PresenceDetail>,
}

impl MonthlyGradeDetail {
    pub fn empty() -> Self {
        Self {
            final_score: None,
            base_grade: None,
            assessment_adjustment: 0.0,
            grades: Vec::new(),
            assessments: Vec::new(),
            notes: Vec::new(),
            presence: Vec::new(),
        }
    }
}

/// When the final score gets bounded to `0..=20`.
///
/// `CombinedOnly` clamps only when assessments adjust the base grade, so a
/// grade-only month over 20 (malformed points) passes through unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ClampPolicy {
    #[default]
    CombinedOnly,
    Always,
}

impl ClampPolicy {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "combinedOnly" => Some(ClampPolicy::CombinedOnly),
            "always" => Some(ClampPolicy::Always),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ClampPolicy::CombinedOnly => "combinedOnly",
            ClampPolicy::Always => "always",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CalcError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl CalcError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

pub fn default_assessment_weight(label: &str) -> Option<f64> {
    DEFAULT_ASSESSMENT_WEIGHTS
        .iter()
        .find(|(l, _)| *l == label)
        .map(|(_, w)| *w)
}

/// Explicit weight, then the override table, then the built-in table.
/// Unknown labels resolve to 0.
pub fn resolve_weight(entry: &AssessmentEntry, overrides: &AssessmentOverrides) -> ResolvedWeight {
    if let Some(w) = entry.weight {
        return ResolvedWeight {
            applied_weight: w,
            source: WeightSource::Explicit,
        };
    }
    if let Some(w) = overrides.get(&entry.value) {
        return ResolvedWeight {
            applied_weight: *w,
            source: WeightSource::Custom,
        };
    }
    ResolvedWeight {
        applied_weight: default_assessment_weight(&entry.value).unwrap_or(0.0),
        source: WeightSource::Default,
    }
}

pub fn normalize_grade(entry: &GradeEntry) -> f64 {
    match entry.total_points {
        Some(p) if p > 0.0 => (entry.value / p) * GRADE_SCALE,
        _ => entry.value,
    }
}

pub fn aggregate_period(
    grades: &[GradeEntry],
    assessments: &[AssessmentEntry],
    overrides: &AssessmentOverrides,
) -> MonthlyGradeDetail {
    aggregate_period_with(grades, assessments, overrides, ClampPolicy::default())
}

pub fn aggregate_period_with(
    grades: &[GradeEntry],
    assessments: &[AssessmentEntry],
    overrides: &AssessmentOverrides,
    policy: ClampPolicy,
) -> MonthlyGradeDetail {
    let assessment_details: Vec<AssessmentDetail> = assessments
        .iter()
        .map(|a| {
            let resolved = resolve_weight(a, overrides);
            AssessmentDetail {
                entry: a.clone(),
                applied_weight: resolved.applied_weight,
                weight_source: resolved.source,
            }
        })
        .collect();
    let assessment_adjustment: f64 = assessment_details.iter().map(|a| a.applied_weight).sum();

    if grades.is_empty() {
        return MonthlyGradeDetail {
            assessment_adjustment,
            assessments: assessment_details,
            ..MonthlyGradeDetail::empty()
        };
    }

    let total_value: f64 = grades.iter().map(|g| g.value).sum();
    let total_points: f64 = grades.iter().map(GradeEntry::points).sum();
    let base_grade = if total_points > 0.0 {
        (total_value / total_points) * GRADE_SCALE
    } else {
        0.0
    };

    let grade_details: Vec<GradeDetail> = grades
        .iter()
        .map(|g| GradeDetail {
            entry: g.clone(),
            normalized_value: normalize_grade(g),
            record_id: None,
        })
        .collect();

    let final_score = if assessment_details.is_empty() {
        match policy {
            ClampPolicy::CombinedOnly => base_grade,
            ClampPolicy::Always => clamp_score(base_grade),
        }
    } else {
        clamp_score(base_grade + assessment_adjustment)
    };

    MonthlyGradeDetail {
        final_score: Some(final_score),
        base_grade: Some(base_grade),
        assessment_adjustment,
        grades: grade_details,
        assessments: assessment_details,
        notes: Vec::new(),
        presence: Vec::new(),
    }
}

pub fn clamp_score(x: f64) -> f64 {
    GRADE_SCALE.min(x.max(0.0))
}

/// Mean of the present values; `None` when nothing is present.
pub fn average<I>(values: I) -> Option<f64>
where
    I: IntoIterator<Item = Option<f64>>,
{
    let mut sum = 0.0_f64;
    let mut count = 0_usize;
    for v in values.into_iter().flatten() {
        sum += v;
        count += 1;
    }
    if count > 0 {
        Some(sum / (count as f64))
    } else {
        None
    }
}

/// Credit-weighted mean. Non-positive weights count as 1.
pub fn weighted_average<I>(values: I) -> Option<f64>
where
    I: IntoIterator<Item = (Option<f64>, f64)>,
{
    let mut sum = 0.0_f64;
    let mut denom = 0.0_f64;
    for (v, w) in values {
        let Some(v) = v else {
            continue;
        };
        let w = if w > 0.0 { w } else { 1.0 };
        sum += v * w;
        denom += w;
    }
    if denom > 0.0 {
        Some(sum / denom)
    } else {
        None
    }
}

/// Half-up rounding to `decimals` places.
pub fn round_to(x: f64, decimals: u32) -> f64 {
    let factor = 10_f64.powi(decimals as i32);
    ((x * factor) + 0.5).floor() / factor
}

/// Competition ranking ("1,2,2,4"): ties share the better rank and the next
/// distinct score takes its 1-based position.
pub fn rank<K>(entries: &[(K, Option<f64>)]) -> HashMap<K, u32>
where
    K: Eq + Hash + Clone,
{
    let mut scored: Vec<(&K, f64)> = entries
        .iter()
        .filter_map(|(k, s)| s.filter(|v| !v.is_nan()).map(|v| (k, v)))
        .collect();
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));

    let mut ranks = HashMap::with_capacity(scored.len());
    let mut current_rank = 0_u32;
    let mut previous: Option<f64> = None;
    for (idx, (k, score)) in scored.into_iter().enumerate() {
        if previous != Some(score) {
            current_rank = (idx as u32) + 1;
        }
        ranks.insert(k.clone(), current_rank);
        previous = Some(score);
    }
    ranks
}

/// Percent change from `previous` to `current`; undefined against a zero.
pub fn progress_percent(current: Option<f64>, previous: Option<f64>) -> Option<f64> {
    match (current, previous) {
        (Some(c), Some(p)) if p != 0.0 => Some(((c - p) / p) * 100.0),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ScoreBand {
    Excellent,
    Good,
    Fair,
    Pass,
    Fail,
}

pub fn score_band(score: f64) -> ScoreBand {
    if score >= 18.0 {
        ScoreBand::Excellent
    } else if score >= 15.0 {
        ScoreBand::Good
    } else if score >= 12.0 {
        ScoreBand::Fair
    } else if score >= 10.0 {
        ScoreBand::Pass
    } else {
        ScoreBand::Fail
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grade(value: f64, total_points: Option<f64>) -> GradeEntry {
        GradeEntry {
            value,
            total_points,
            description: String::new(),
            date: String::new(),
        }
    }

    fn assessment(value: &str, weight: Option<f64>) -> AssessmentEntry {
        AssessmentEntry {
            title: "participation".to_string(),
            value: value.to_string(),
            date: String::new(),
            weight,
        }
    }

    #[test]
    fn explicit_weight_beats_override_and_default() {
        let mut overrides = AssessmentOverrides::new();
        overrides.insert("excellent".to_string(), 3.0);
        let r = resolve_weight(&assessment("excellent", Some(5.0)), &overrides);
        assert_eq!(r.applied_weight, 5.0);
        assert_eq!(r.source, WeightSource::Explicit);
    }

    #[test]
    fn override_beats_default_table() {
        let mut overrides = AssessmentOverrides::new();
        overrides.insert("ضعیف".to_string(), -3.0);
        let r = resolve_weight(&assessment("ضعیف", None), &overrides);
        assert_eq!(r.applied_weight, -3.0);
        assert_eq!(r.source, WeightSource::Custom);
    }

    #[test]
    fn unknown_label_resolves_to_zero_default() {
        let r = resolve_weight(&assessment("stellar", None), &AssessmentOverrides::new());
        assert_eq!(r.applied_weight, 0.0);
        assert_eq!(r.source, WeightSource::Default);

        let r = resolve_weight(&assessment("بسیار ضعیف", None), &AssessmentOverrides::new());
        assert_eq!(r.applied_weight, -2.0);
    }

    #[test]
    fn assessments_without_grades_keep_score_null() {
        let out = aggregate_period(
            &[],
            &[assessment("excellent", None), assessment("good", None)],
            &AssessmentOverrides::new(),
        );
        assert_eq!(out.base_grade, None);
        assert_eq!(out.final_score, None);
        assert_eq!(out.assessment_adjustment, 3.0);
        assert_eq!(out.assessments.len(), 2);
        assert!(out.grades.is_empty());
    }

    #[test]
    fn month_seven_scenario_caps_at_twenty() {
        let out = aggregate_period(
            &[grade(18.0, Some(20.0)), grade(16.0, Some(20.0))],
            &[assessment("excellent", None)],
            &AssessmentOverrides::new(),
        );
        assert_eq!(out.base_grade, Some(17.0));
        assert_eq!(out.assessment_adjustment, 2.0);
        assert_eq!(out.final_score, Some(19.0));
    }

    #[test]
    fn month_eight_scenario_subtracts_weak() {
        let out = aggregate_period(
            &[grade(19.0, Some(20.0))],
            &[assessment("weak", None)],
            &AssessmentOverrides::new(),
        );
        assert_eq!(out.base_grade, Some(19.0));
        assert_eq!(out.final_score, Some(18.0));
    }

    #[test]
    fn mixed_point_scales_normalize_on_totals() {
        let out = aggregate_period(
            &[grade(8.0, Some(10.0)), grade(20.0, None)],
            &[],
            &AssessmentOverrides::new(),
        );
        // (8 + 20) / (10 + 20) * 20
        let expected = 28.0 / 30.0 * 20.0;
        assert!((out.base_grade.expect("base") - expected).abs() < 1e-9);
        assert_eq!(out.final_score, out.base_grade);
        assert_eq!(out.grades[0].normalized_value, 16.0);
        assert_eq!(out.grades[1].normalized_value, 20.0);
    }

    #[test]
    fn grade_only_month_is_not_clamped_by_default() {
        let grades = [grade(25.0, Some(20.0))];
        let out = aggregate_period(&grades, &[], &AssessmentOverrides::new());
        assert_eq!(out.final_score, Some(25.0));

        let out = aggregate_period_with(
            &grades,
            &[],
            &AssessmentOverrides::new(),
            ClampPolicy::Always,
        );
        assert_eq!(out.final_score, Some(20.0));
    }

    #[test]
    fn combined_score_floors_at_zero() {
        let out = aggregate_period(
            &[grade(1.0, Some(20.0))],
            &[assessment("very weak", None), assessment("weak", None)],
            &AssessmentOverrides::new(),
        );
        assert_eq!(out.base_grade, Some(1.0));
        assert_eq!(out.assessment_adjustment, -3.0);
        assert_eq!(out.final_score, Some(0.0));
    }

    #[test]
    fn average_skips_missing_values() {
        assert_eq!(average([Some(12.0), None, Some(16.0)]), Some(14.0));
        assert_eq!(average([None, None]), None);
        assert_eq!(average(Vec::<Option<f64>>::new()), None);
    }

    #[test]
    fn weighted_average_defaults_weight_to_one() {
        let v = weighted_average([(Some(20.0), 3.0), (Some(10.0), 0.0), (None, 5.0)]);
        assert_eq!(v, Some(70.0 / 4.0));
        assert_eq!(weighted_average([(None, 1.0)]), None);
    }

    #[test]
    fn round_to_is_half_up() {
        assert_eq!(round_to(18.125, 2), 18.13);
        assert_eq!(round_to(14.0, 2), 14.0);
        assert_eq!(round_to(17.333333, 2), 17.33);
    }

    #[test]
    fn ties_share_rank_and_next_rank_skips() {
        let ranks = rank(&[
            ("a".to_string(), Some(18.0)),
            ("b".to_string(), Some(18.0)),
            ("c".to_string(), Some(15.0)),
            ("d".to_string(), None),
        ]);
        assert_eq!(ranks.get("a"), Some(&1));
        assert_eq!(ranks.get("b"), Some(&1));
        assert_eq!(ranks.get("c"), Some(&3));
        assert_eq!(ranks.get("d"), None);
    }

    #[test]
    fn empty_cohort_has_no_ranks() {
        let ranks: HashMap<String, u32> = rank(&[]);
        assert!(ranks.is_empty());
    }

    #[test]
    fn progress_is_undefined_against_zero_or_missing() {
        assert_eq!(progress_percent(Some(18.0), Some(16.0)), Some(12.5));
        assert_eq!(progress_percent(Some(18.0), Some(0.0)), None);
        assert_eq!(progress_percent(None, Some(10.0)), None);
    }

    #[test]
    fn bands_follow_score_thresholds() {
        assert_eq!(score_band(19.5), ScoreBand::Excellent);
        assert_eq!(score_band(15.0), ScoreBand::Good);
        assert_eq!(score_band(12.4), ScoreBand::Fair);
        assert_eq!(score_band(10.0), ScoreBand::Pass);
        assert_eq!(score_band(9.99), ScoreBand::Fail);
    }
}
