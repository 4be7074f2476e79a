//! Monthly grade views over classsheet records.
//!
//! Every builder reloads raw cells, keeps the ones inside the target school
//! year, buckets them by Jalali month and runs the pure calculations in
//! [`crate::calc`]. Nothing here is cached or written back.

use crate::calc::{
    self, AssessmentEntry, AssessmentOverrides, CalcError, ClampPolicy, GradeEntry, MonthlyGradeDetail,
    MonthlyNote, NoteKind, PresenceDetail, ScoreBand,
};
use crate::calendar;
use crate::db;
use chrono::NaiveDate;
use rusqlite::{params_from_iter, types::Value, Connection, OptionalExtension};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};

#[derive(Debug, Clone)]
pub struct ReportContext<'a> {
    pub conn: &'a Connection,
    pub school_code: &'a str,
    /// Anchors "current school year" when the caller does not pick one.
    pub reference_date: NaiveDate,
    pub utc_offset_minutes: i32,
    pub clamp_policy: ClampPolicy,
}

impl ReportContext<'_> {
    pub fn target_school_year(&self, requested: Option<i32>) -> i32 {
        requested.unwrap_or_else(|| calendar::current_school_year(self.reference_date))
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseGrades {
    pub class_code: String,
    pub course_code: String,
    pub course_name: String,
    pub monthly_grades: BTreeMap<u32, MonthlyGradeDetail>,
    pub year_average: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentReport {
    pub student_code: String,
    pub student_name: String,
    pub school_year: Option<i32>,
    pub course_grades: Vec<CourseGrades>,
    pub overall_average: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseSheetRow {
    pub student_code: String,
    pub student_name: String,
    pub family_name: String,
    pub monthly_grades: BTreeMap<u32, Option<f64>>,
    pub monthly_ranks: BTreeMap<u32, u32>,
    pub year_average: Option<f64>,
    pub year_average_rank: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseSheet {
    pub class_code: String,
    pub course_code: String,
    pub course_name: String,
    pub teacher_code: Option<String>,
    pub school_year: i32,
    pub students: Vec<CourseSheetRow>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OverviewCourse {
    pub course_key: String,
    pub teacher_code: String,
    pub course_code: String,
    pub course_name: String,
    pub credit_units: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OverviewRow {
    pub student_code: String,
    pub student_name: String,
    /// Keyed `{teacherCode}_{courseCode}_{month}`.
    pub grade_details: BTreeMap<String, MonthlyGradeDetail>,
    /// Keyed `{teacherCode}_{courseCode}`.
    pub course_scores: BTreeMap<String, Option<f64>>,
    pub progress: BTreeMap<String, f64>,
    pub ranks: BTreeMap<String, u32>,
    pub average: Option<f64>,
    pub average_rank: Option<u32>,
    pub band: Option<ScoreBand>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassOverview {
    pub class_code: String,
    pub school_year: i32,
    pub month: Option<u32>,
    pub courses: Vec<OverviewCourse>,
    pub students: Vec<OverviewRow>,
}

#[derive(Debug, Clone)]
struct CellRow {
    id: String,
    student_code: String,
    class_code: String,
    course_code: String,
    teacher_code: String,
    date: Option<String>,
    grades: Vec<GradeEntry>,
    assessments: Vec<AssessmentEntry>,
    note: Option<String>,
    descriptive_status: Option<String>,
    presence_status: Option<String>,
    time_slot: Option<String>,
}

#[derive(Debug, Clone)]
struct ClassStudent {
    code: String,
    first_name: String,
    family_name: String,
}

impl ClassStudent {
    fn display_name(&self) -> String {
        let full = format!("{} {}", self.first_name, self.family_name);
        let full = full.trim();
        if full.is_empty() {
            self.code.clone()
        } else {
            full.to_string()
        }
    }
}

#[derive(Debug, Default)]
struct MonthBucket {
    grades: Vec<GradeEntry>,
    grade_record_ids: Vec<String>,
    assessments: Vec<AssessmentEntry>,
    notes: Vec<MonthlyNote>,
    presence: Vec<PresenceDetail>,
}

impl MonthBucket {
    fn push(&mut self, cell: &CellRow) {
        for g in &cell.grades {
            self.grades.push(g.clone());
            self.grade_record_ids.push(cell.id.clone());
        }
        self.assessments.extend(cell.assessments.iter().cloned());

        let note_of = |kind: NoteKind, value: &Option<String>| {
            value
                .as_ref()
                .filter(|v| !v.is_empty())
                .map(|v| MonthlyNote {
                    kind,
                    value: v.clone(),
                    date: cell.date.clone(),
                })
        };
        self.notes.extend(note_of(NoteKind::Note, &cell.note));
        self.notes
            .extend(note_of(NoteKind::DescriptiveStatus, &cell.descriptive_status));

        if let Some(status) = cell.presence_status.as_ref().filter(|s| !s.is_empty()) {
            self.presence.push(PresenceDetail {
                status: Some(status.clone()),
                date: cell.date.clone(),
                time_slot: cell.time_slot.clone(),
                note: cell.note.clone().filter(|n| !n.is_empty()),
            });
        }
    }

    fn has_scores_input(&self) -> bool {
        !self.grades.is_empty() || !self.assessments.is_empty()
    }

    fn into_detail(self, overrides: &AssessmentOverrides, policy: ClampPolicy) -> MonthlyGradeDetail {
        let mut detail =
            calc::aggregate_period_with(&self.grades, &self.assessments, overrides, policy);
        for (g, record_id) in detail.grades.iter_mut().zip(self.grade_record_ids) {
            g.record_id = Some(record_id);
        }
        detail.notes = dedup_notes(self.notes);
        detail.presence = dedup_presence(self.presence);
        detail
    }
}

fn dedup_notes(notes: Vec<MonthlyNote>) -> Vec<MonthlyNote> {
    let mut seen = HashSet::new();
    notes
        .into_iter()
        .filter(|n| seen.insert((n.kind, n.value.clone(), n.date.clone().unwrap_or_default())))
        .collect()
}

/// Keyed on (status, date, time slot). A repeat keeps the first entry's
/// position and takes the later entry's fields.
fn dedup_presence(presence: Vec<PresenceDetail>) -> Vec<PresenceDetail> {
    let mut index: HashMap<(String, String, String), usize> = HashMap::new();
    let mut out: Vec<PresenceDetail> = Vec::with_capacity(presence.len());
    for p in presence {
        let key = (
            p.status.clone().unwrap_or_default(),
            p.date.clone().unwrap_or_default(),
            p.time_slot.clone().unwrap_or_default(),
        );
        match index.get(&key) {
            Some(&i) => out[i] = p,
            None => {
                index.insert(key, out.len());
                out.push(p);
            }
        }
    }
    out
}

fn query_err(e: rusqlite::Error) -> CalcError {
    CalcError::new("db_query_failed", e.to_string())
}

/// Jalali month of a cell inside `school_year`, or `None` when it falls
/// outside the year or its date cannot be read.
fn school_month_of(cell: &CellRow, school_year: i32, utc_offset_minutes: i32) -> Option<u32> {
    let raw = cell.date.as_deref()?;
    let civil = match calendar::parse_civil_date(raw, utc_offset_minutes) {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!(record_id = %cell.id, date = raw, error = %e, "skipping record with unreadable date");
            return None;
        }
    };
    if calendar::school_year_of(civil) != school_year {
        return None;
    }
    Some(civil.month)
}

fn bucket_by_month<'c, I>(
    cells: I,
    school_year: i32,
    utc_offset_minutes: i32,
) -> BTreeMap<u32, MonthBucket>
where
    I: IntoIterator<Item = &'c CellRow>,
{
    let mut buckets: BTreeMap<u32, MonthBucket> = BTreeMap::new();
    for cell in cells {
        if let Some(month) = school_month_of(cell, school_year, utc_offset_minutes) {
            buckets.entry(month).or_default().push(cell);
        }
    }
    buckets
}

fn parse_json_list<T: serde::de::DeserializeOwned>(record_id: &str, column: &str, raw: &str) -> Vec<T> {
    match serde_json::from_str::<Vec<T>>(raw) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(record_id, column, error = %e, "ignoring malformed entries");
            Vec::new()
        }
    }
}

fn load_cells(
    conn: &Connection,
    school_code: &str,
    filters: &[(&str, &str)],
) -> Result<Vec<CellRow>, CalcError> {
    let mut sql = String::from(
        "SELECT id, student_code, class_code, course_code, teacher_code, date,
                grades_json, assessments_json, note, descriptive_status, presence_status, time_slot
         FROM classsheet
         WHERE school_code = ?",
    );
    let mut bind_values: Vec<Value> = vec![Value::Text(school_code.to_string())];
    for (column, value) in filters {
        sql.push_str(&format!(" AND {} = ?", column));
        bind_values.push(Value::Text(value.to_string()));
    }
    sql.push_str(" ORDER BY date DESC, rowid");

    let mut stmt = conn.prepare(&sql).map_err(query_err)?;
    let rows = stmt
        .query_map(params_from_iter(bind_values), |r| {
            let id: String = r.get(0)?;
            let grades_json: String = r.get(6)?;
            let assessments_json: String = r.get(7)?;
            Ok(CellRow {
                grades: parse_json_list(&id, "grades", &grades_json),
                assessments: parse_json_list(&id, "assessments", &assessments_json),
                id,
                student_code: r.get(1)?,
                class_code: r.get(2)?,
                course_code: r.get(3)?,
                teacher_code: r.get(4)?,
                date: r.get(5)?,
                note: r.get(8)?,
                descriptive_status: r.get(9)?,
                presence_status: r.get(10)?,
                time_slot: r.get(11)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_err)?;
    Ok(rows)
}

fn course_names(conn: &Connection, school_code: &str) -> Result<HashMap<String, (String, f64)>, CalcError> {
    let mut stmt = conn
        .prepare(
            "SELECT course_code, course_name, credit_units
             FROM courses
             WHERE school_code = ?",
        )
        .map_err(query_err)?;
    let rows = stmt
        .query_map([school_code], |r| {
            let code: String = r.get(0)?;
            let name: String = r.get(1)?;
            let credit_units: Option<f64> = r.get(2)?;
            Ok((code, (name, credit_units.unwrap_or(1.0))))
        })
        .and_then(|it| it.collect::<Result<HashMap<_, _>, _>>())
        .map_err(query_err)?;
    Ok(rows)
}

fn class_students(conn: &Connection, school_code: &str, class_code: &str) -> Result<Vec<ClassStudent>, CalcError> {
    let mut stmt = conn
        .prepare(
            "SELECT s.student_code, s.first_name, s.family_name
             FROM student_classes sc
             JOIN students s
               ON s.school_code = sc.school_code AND s.student_code = sc.student_code
             WHERE sc.school_code = ? AND sc.class_code = ?
             ORDER BY s.family_name, s.first_name, s.student_code",
        )
        .map_err(query_err)?;
    let rows = stmt
        .query_map((school_code, class_code), |r| {
            Ok(ClassStudent {
                code: r.get(0)?,
                first_name: r.get(1)?,
                family_name: r.get(2)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_err)?;
    Ok(rows)
}

fn ensure_class(conn: &Connection, school_code: &str, class_code: &str) -> Result<(), CalcError> {
    let exists = conn
        .query_row(
            "SELECT 1 FROM classes WHERE school_code = ? AND class_code = ?",
            (school_code, class_code),
            |r| r.get::<_, i64>(0),
        )
        .optional()
        .map_err(query_err)?;
    match exists {
        Some(_) => Ok(()),
        None => Err(CalcError::new("not_found", "class not found")),
    }
}

pub fn compute_student_report(
    ctx: &ReportContext<'_>,
    student_code: &str,
    school_year: Option<i32>,
) -> Result<StudentReport, CalcError> {
    let conn = ctx.conn;

    let student: Option<ClassStudent> = conn
        .query_row(
            "SELECT student_code, first_name, family_name
             FROM students
             WHERE school_code = ? AND student_code = ?",
            (ctx.school_code, student_code),
            |r| {
                Ok(ClassStudent {
                    code: r.get(0)?,
                    first_name: r.get(1)?,
                    family_name: r.get(2)?,
                })
            },
        )
        .optional()
        .map_err(query_err)?;
    let Some(student) = student else {
        return Err(CalcError::new("not_found", "student not found"));
    };

    // Membership only gates the report; cells from classes the student has
    // since left still count.
    let enrolled = conn
        .query_row(
            "SELECT 1 FROM student_classes
             WHERE school_code = ? AND student_code = ?
             LIMIT 1",
            (ctx.school_code, student_code),
            |r| r.get::<_, i64>(0),
        )
        .optional()
        .map_err(query_err)?;

    if enrolled.is_none() {
        return Ok(StudentReport {
            student_code: student.code.clone(),
            student_name: student.display_name(),
            school_year: None,
            course_grades: Vec::new(),
            overall_average: None,
        });
    }

    let year = ctx.target_school_year(school_year);
    let cells = load_cells(conn, ctx.school_code, &[("student_code", student_code)])?;
    let overrides = db::school_assessment_overrides(conn, ctx.school_code).map_err(query_err)?;
    let courses = course_names(conn, ctx.school_code)?;

    let mut groups: BTreeMap<(String, String), Vec<&CellRow>> = BTreeMap::new();
    for cell in &cells {
        groups
            .entry((cell.class_code.clone(), cell.course_code.clone()))
            .or_default()
            .push(cell);
    }

    let mut course_grades = Vec::new();
    for ((class_code, course_code), group) in groups {
        let mut buckets = bucket_by_month(group.iter().copied(), year, ctx.utc_offset_minutes);
        if buckets.is_empty() {
            continue;
        }

        let mut monthly_grades = BTreeMap::new();
        for month in 1..=12 {
            let detail = match buckets.remove(&month) {
                Some(bucket) => bucket.into_detail(&overrides, ctx.clamp_policy),
                None => MonthlyGradeDetail::empty(),
            };
            monthly_grades.insert(month, detail);
        }
        let year_average = calc::average(monthly_grades.values().map(|d| d.final_score));
        let course_name = courses
            .get(&course_code)
            .map(|(name, _)| name.clone())
            .unwrap_or_else(|| course_code.clone());

        course_grades.push(CourseGrades {
            class_code,
            course_code,
            course_name,
            monthly_grades,
            year_average,
        });
    }

    let overall_average = calc::average(course_grades.iter().map(|c| c.year_average));
    tracing::debug!(
        student_code,
        school_year = year,
        courses = course_grades.len(),
        "computed student report"
    );

    Ok(StudentReport {
        student_code: student.code.clone(),
        student_name: student.display_name(),
        school_year: Some(year),
        course_grades,
        overall_average,
    })
}

pub fn compute_course_sheet(
    ctx: &ReportContext<'_>,
    class_code: &str,
    course_code: &str,
    teacher_code: Option<&str>,
    school_year: Option<i32>,
) -> Result<CourseSheet, CalcError> {
    let conn = ctx.conn;
    ensure_class(conn, ctx.school_code, class_code)?;

    if let Some(teacher) = teacher_code {
        let assigned = conn
            .query_row(
                "SELECT 1 FROM class_teachers
                 WHERE school_code = ? AND class_code = ? AND teacher_code = ? AND course_code = ?",
                (ctx.school_code, class_code, teacher, course_code),
                |r| r.get::<_, i64>(0),
            )
            .optional()
            .map_err(query_err)?;
        if assigned.is_none() {
            return Err(
                CalcError::new("forbidden", "teacher does not teach this course in this class")
                    .with_details(serde_json::json!({
                        "teacherCode": teacher,
                        "classCode": class_code,
                        "courseCode": course_code
                    })),
            );
        }
    }

    let year = ctx.target_school_year(school_year);
    let course_name = course_names(conn, ctx.school_code)?
        .remove(course_code)
        .map(|(name, _)| name)
        .unwrap_or_else(|| course_code.to_string());
    let students = class_students(conn, ctx.school_code, class_code)?;

    let mut filters = vec![("class_code", class_code), ("course_code", course_code)];
    if let Some(teacher) = teacher_code {
        filters.push(("teacher_code", teacher));
    }
    let cells = load_cells(conn, ctx.school_code, &filters)?;
    let overrides = match teacher_code {
        Some(teacher) => db::teacher_assessment_overrides(conn, ctx.school_code, teacher),
        None => db::school_assessment_overrides(conn, ctx.school_code),
    }
    .map_err(query_err)?;

    let mut by_student: HashMap<&str, Vec<&CellRow>> = HashMap::new();
    for cell in &cells {
        by_student.entry(cell.student_code.as_str()).or_default().push(cell);
    }

    let mut rows: Vec<CourseSheetRow> = Vec::with_capacity(students.len());
    for s in &students {
        let student_cells = by_student.remove(s.code.as_str()).unwrap_or_default();
        let mut buckets = bucket_by_month(student_cells, year, ctx.utc_offset_minutes);

        let mut monthly_grades = BTreeMap::new();
        for month in 1..=12 {
            let score = buckets
                .remove(&month)
                .filter(|b| !b.grades.is_empty())
                .and_then(|b| b.into_detail(&overrides, ctx.clamp_policy).final_score);
            monthly_grades.insert(month, score);
        }
        let year_average = calc::average(monthly_grades.values().copied());

        rows.push(CourseSheetRow {
            student_code: s.code.clone(),
            student_name: s.display_name(),
            family_name: s.family_name.clone(),
            monthly_grades,
            monthly_ranks: BTreeMap::new(),
            year_average,
            year_average_rank: None,
        });
    }

    for month in 1..=12 {
        let cohort: Vec<(String, Option<f64>)> = rows
            .iter()
            .map(|r| (r.student_code.clone(), r.monthly_grades.get(&month).copied().flatten()))
            .collect();
        let ranks = calc::rank(&cohort);
        for row in rows.iter_mut() {
            if let Some(rank) = ranks.get(&row.student_code) {
                row.monthly_ranks.insert(month, *rank);
            }
        }
    }
    let cohort: Vec<(String, Option<f64>)> = rows
        .iter()
        .map(|r| (r.student_code.clone(), r.year_average))
        .collect();
    let year_ranks = calc::rank(&cohort);
    for row in rows.iter_mut() {
        row.year_average_rank = year_ranks.get(&row.student_code).copied();
    }

    Ok(CourseSheet {
        class_code: class_code.to_string(),
        course_code: course_code.to_string(),
        course_name,
        teacher_code: teacher_code.map(str::to_string),
        school_year: year,
        students: rows,
    })
}

pub fn compute_class_overview(
    ctx: &ReportContext<'_>,
    class_code: &str,
    month: Option<u32>,
    school_year: Option<i32>,
) -> Result<ClassOverview, CalcError> {
    let conn = ctx.conn;
    if let Some(m) = month {
        if !(1..=12).contains(&m) {
            return Err(CalcError::new("bad_params", "month must be between 1 and 12"));
        }
    }
    ensure_class(conn, ctx.school_code, class_code)?;

    let year = ctx.target_school_year(school_year);
    let course_info = course_names(conn, ctx.school_code)?;

    let mut course_stmt = conn
        .prepare(
            "SELECT teacher_code, course_code
             FROM class_teachers
             WHERE school_code = ? AND class_code = ?
             ORDER BY course_code, teacher_code",
        )
        .map_err(query_err)?;
    let courses: Vec<OverviewCourse> = course_stmt
        .query_map((ctx.school_code, class_code), |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_err)?
        .into_iter()
        .map(|(teacher_code, course_code)| {
            let (course_name, credit_units) = course_info
                .get(&course_code)
                .cloned()
                .unwrap_or_else(|| (course_code.clone(), 1.0));
            OverviewCourse {
                course_key: format!("{}_{}", teacher_code, course_code),
                teacher_code,
                course_code,
                course_name,
                credit_units,
            }
        })
        .collect();

    let students = class_students(conn, ctx.school_code, class_code)?;
    let cells = load_cells(conn, ctx.school_code, &[("class_code", class_code)])?;

    let mut overrides_by_teacher: HashMap<&str, AssessmentOverrides> = HashMap::new();
    for c in &courses {
        if !overrides_by_teacher.contains_key(c.teacher_code.as_str()) {
            let o = db::teacher_assessment_overrides(conn, ctx.school_code, &c.teacher_code)
                .map_err(query_err)?;
            overrides_by_teacher.insert(c.teacher_code.as_str(), o);
        }
    }

    let mut by_key: HashMap<(&str, &str, &str), Vec<&CellRow>> = HashMap::new();
    for cell in &cells {
        by_key
            .entry((
                cell.student_code.as_str(),
                cell.teacher_code.as_str(),
                cell.course_code.as_str(),
            ))
            .or_default()
            .push(cell);
    }

    let months: Vec<u32> = match month {
        Some(m) => vec![m],
        None => calendar::SCHOOL_YEAR_MONTHS.to_vec(),
    };

    let no_overrides = AssessmentOverrides::new();
    let mut rows: Vec<OverviewRow> = Vec::with_capacity(students.len());
    for s in &students {
        let mut grade_details = BTreeMap::new();
        let mut course_scores = BTreeMap::new();
        let mut progress = BTreeMap::new();
        let mut weighted = Vec::with_capacity(courses.len());

        for c in &courses {
            let overrides = overrides_by_teacher
                .get(c.teacher_code.as_str())
                .unwrap_or(&no_overrides);
            let student_cells = by_key
                .remove(&(s.code.as_str(), c.teacher_code.as_str(), c.course_code.as_str()))
                .unwrap_or_default();
            let buckets = bucket_by_month(student_cells, year, ctx.utc_offset_minutes);

            let mut finals: BTreeMap<u32, Option<f64>> = BTreeMap::new();
            for (m, bucket) in buckets {
                let keep = months.contains(&m) && bucket.has_scores_input();
                let detail = bucket.into_detail(overrides, ctx.clamp_policy);
                finals.insert(m, detail.final_score);
                if keep {
                    grade_details.insert(format!("{}_{}", c.course_key, m), detail);
                }
            }

            for m in &months {
                let current = finals.get(m).copied().flatten();
                let previous = calendar::previous_school_month(*m)
                    .and_then(|p| finals.get(&p).copied().flatten());
                if let Some(pct) = calc::progress_percent(current, previous) {
                    progress.insert(format!("{}_{}", c.course_key, m), pct);
                }
            }

            let score = match month {
                Some(m) => finals.get(&m).copied().flatten(),
                None => calc::average(finals.values().copied()).map(|v| calc::round_to(v, 2)),
            };
            course_scores.insert(c.course_key.clone(), score);
            weighted.push((score, c.credit_units));
        }

        let average = calc::weighted_average(weighted).map(|v| calc::round_to(v, 2));
        rows.push(OverviewRow {
            student_code: s.code.clone(),
            student_name: s.display_name(),
            grade_details,
            course_scores,
            progress,
            ranks: BTreeMap::new(),
            average,
            average_rank: None,
            band: average.map(calc::score_band),
        });
    }

    for c in &courses {
        for m in &months {
            let key = format!("{}_{}", c.course_key, m);
            let cohort: Vec<(String, Option<f64>)> = rows
                .iter()
                .map(|r| {
                    (
                        r.student_code.clone(),
                        r.grade_details.get(&key).and_then(|d| d.final_score),
                    )
                })
                .collect();
            let ranks = calc::rank(&cohort);
            for row in rows.iter_mut() {
                if let Some(rank) = ranks.get(&row.student_code) {
                    row.ranks.insert(key.clone(), *rank);
                }
            }
        }
    }
    let cohort: Vec<(String, Option<f64>)> = rows
        .iter()
        .map(|r| (r.student_code.clone(), r.average))
        .collect();
    let average_ranks = calc::rank(&cohort);
    for row in rows.iter_mut() {
        row.average_rank = average_ranks.get(&row.student_code).copied();
    }

    Ok(ClassOverview {
        class_code: class_code.to_string(),
        school_year: year,
        month,
        courses,
        students: rows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cell(id: &str, date: Option<&str>) -> CellRow {
        CellRow {
            id: id.to_string(),
            student_code: "100".to_string(),
            class_code: "c1".to_string(),
            course_code: "math".to_string(),
            teacher_code: "t1".to_string(),
            date: date.map(str::to_string),
            grades: vec![GradeEntry {
                value: 15.0,
                total_points: None,
                description: "quiz".to_string(),
                date: String::new(),
            }],
            assessments: Vec::new(),
            note: None,
            descriptive_status: None,
            presence_status: None,
            time_slot: None,
        }
    }

    #[test]
    fn bucketing_skips_bad_dates_and_other_years() {
        let cells = vec![
            cell("a", Some("2024-10-01")),
            cell("b", Some("not a date")),
            cell("c", None),
            cell("d", Some("2024-04-10")),
            cell("e", Some("2025-04-10")),
        ];
        let buckets = bucket_by_month(&cells, 1403, 0);
        assert_eq!(buckets.keys().copied().collect::<Vec<_>>(), vec![1, 7]);
        assert_eq!(buckets[&7].grade_record_ids, vec!["a".to_string()]);
        assert_eq!(buckets[&1].grade_record_ids, vec!["e".to_string()]);
    }

    #[test]
    fn notes_and_presence_are_deduplicated() {
        let mut a = cell("a", Some("2024-10-01"));
        a.note = Some("late homework".to_string());
        a.presence_status = Some("absent".to_string());
        a.time_slot = Some("1".to_string());
        let mut b = a.clone();
        b.id = "b".to_string();
        b.descriptive_status = Some("needs effort".to_string());

        let mut bucket = MonthBucket::default();
        bucket.push(&a);
        bucket.push(&b);
        let detail = bucket.into_detail(&AssessmentOverrides::new(), ClampPolicy::CombinedOnly);

        assert_eq!(detail.notes.len(), 2);
        assert_eq!(detail.notes[0].kind, NoteKind::Note);
        assert_eq!(detail.notes[1].kind, NoteKind::DescriptiveStatus);
        assert_eq!(detail.presence.len(), 1);
        assert_eq!(detail.presence[0].note.as_deref(), Some("late homework"));
        assert_eq!(detail.grades.len(), 2);
        assert_eq!(detail.grades[1].record_id.as_deref(), Some("b"));
    }

    #[test]
    fn repeated_presence_keeps_first_slot_with_latest_note() {
        let mut first = cell("a", Some("2024-10-01"));
        first.presence_status = Some("absent".to_string());
        first.time_slot = Some("1".to_string());
        first.note = Some("first".to_string());
        let mut other_slot = first.clone();
        other_slot.id = "b".to_string();
        other_slot.time_slot = Some("2".to_string());
        other_slot.note = None;
        let mut second = first.clone();
        second.id = "c".to_string();
        second.note = Some("second".to_string());

        let mut bucket = MonthBucket::default();
        bucket.push(&first);
        bucket.push(&other_slot);
        bucket.push(&second);
        let detail = bucket.into_detail(&AssessmentOverrides::new(), ClampPolicy::CombinedOnly);

        assert_eq!(detail.presence.len(), 2);
        assert_eq!(detail.presence[0].time_slot.as_deref(), Some("1"));
        assert_eq!(detail.presence[0].note.as_deref(), Some("second"));
        assert_eq!(detail.presence[1].time_slot.as_deref(), Some("2"));
    }
}
