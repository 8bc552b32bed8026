use std::collections::{BTreeMap, HashMap, HashSet};

use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::table::Table;

pub const ROSTER_ID: &str = "NetID";
pub const ROSTER_NAME: &str = "Name";
pub const ROSTER_EMAIL: &str = "Email Address";
pub const ROSTER_GROUP: &str = "Group";
pub const SCORES_ID: &str = "SID";
pub const QUIZ_EMAIL: &str = "Email";
pub const QUIZ_GRADE: &str = "Grade";

/// Half-up rounding at 2 decimals: `floor(100*x + 0.5) / 100`.
pub fn round_off_2_decimals(x: f64) -> f64 {
    ((100.0 * x) + 0.5).floor() / 100.0
}

#[derive(Debug, Error, PartialEq)]
pub enum CompileError {
    #[error("{0}")]
    MalformedIdentifier(String),
    #[error("{0}")]
    MalformedName(String),
    #[error("homework/exam table has no homework score columns")]
    NoHomeworkColumns,
    #[error("{0}")]
    InvalidQuizConfig(String),
    #[error("{table} table is missing join column {column:?}")]
    MissingJoinKey {
        table: &'static str,
        column: &'static str,
    },
    #[error("score column {0:?} has no matching partner column")]
    MismatchedScoreColumns(String),
    #[error("{0}")]
    MalformedScore(String),
}

impl CompileError {
    /// Stable code carried on the IPC error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            CompileError::MalformedIdentifier(_) => "malformed_identifier",
            CompileError::MalformedName(_) => "malformed_name",
            CompileError::NoHomeworkColumns => "no_homework_columns",
            CompileError::InvalidQuizConfig(_) => "invalid_quiz_config",
            CompileError::MissingJoinKey { .. } => "missing_join_key",
            CompileError::MismatchedScoreColumns(_) => "mismatched_score_columns",
            CompileError::MalformedScore(_) => "malformed_score",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExamScore {
    pub number: u32,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GradeRow {
    pub net_id: String,
    pub group: i64,
    pub email_address: String,
    pub last_name: String,
    pub first_name: String,
    pub homework_score: f64,
    pub exam_scores: Vec<ExamScore>,
    pub quiz_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupGrades {
    pub group: i64,
    pub rows: Vec<GradeRow>,
}

/// Final report: one row collection per group, groups in roster-encounter
/// order, rows in roster order within each group.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Gradebook {
    pub groups: Vec<GroupGrades>,
}

impl Gradebook {
    #[allow(dead_code)]
    pub fn group(&self, id: i64) -> Option<&[GradeRow]> {
        self.groups
            .iter()
            .find(|g| g.group == id)
            .map(|g| g.rows.as_slice())
    }

    #[allow(dead_code)]
    pub fn group_ids(&self) -> Vec<i64> {
        self.groups.iter().map(|g| g.group).collect()
    }
}

#[derive(Debug, Clone)]
struct StudentRecord {
    net_id: String,
    last_name: String,
    first_name: String,
    email: String,
    group: i64,
}

/// One raw/max column pair, e.g. `homework_3` + `homework_3_max_points`.
#[derive(Debug, Clone, Copy)]
struct ScorePair {
    number: u32,
    raw_col: usize,
    max_col: usize,
}

#[derive(Debug)]
struct ScoreSchema {
    homeworks: Vec<ScorePair>,
    exams: Vec<ScorePair>,
}

impl ScoreSchema {
    fn detect(table: &Table) -> Result<ScoreSchema, CompileError> {
        Ok(ScoreSchema {
            homeworks: detect_family(table, "homework")?,
            exams: detect_family(table, "exam")?,
        })
    }
}

/// `homework_7` with prefix `homework` -> Some(7). Exactly one or two
/// decimal digits after the prefix, nothing trailing, so a score column
/// never matches a `_max_points` column and vice versa.
fn score_number(name: &str, prefix: &str) -> Option<u32> {
    let digits = name.strip_prefix(prefix)?.strip_prefix('_')?;
    if digits.is_empty() || digits.len() > 2 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

fn detect_family(table: &Table, prefix: &str) -> Result<Vec<ScorePair>, CompileError> {
    let mut raws: BTreeMap<u32, usize> = BTreeMap::new();
    let mut maxes: BTreeMap<u32, usize> = BTreeMap::new();
    for (col, name) in table.columns.iter().enumerate() {
        if let Some(base) = name.strip_suffix("_max_points") {
            if let Some(n) = score_number(base, prefix) {
                maxes.insert(n, col);
                continue;
            }
        }
        if let Some(n) = score_number(name, prefix) {
            raws.insert(n, col);
        }
    }

    let mut pairs = Vec::with_capacity(raws.len());
    for (&number, &raw_col) in &raws {
        let Some(&max_col) = maxes.get(&number) else {
            return Err(CompileError::MismatchedScoreColumns(format!(
                "{prefix}_{number}"
            )));
        };
        pairs.push(ScorePair {
            number,
            raw_col,
            max_col,
        });
    }
    for &number in maxes.keys() {
        if !raws.contains_key(&number) {
            return Err(CompileError::MismatchedScoreColumns(format!(
                "{prefix}_{number}_max_points"
            )));
        }
    }
    Ok(pairs)
}

/// Splits a roster `"Last, First"` string on its first `", "`.
pub fn split_name(name: &str) -> Result<(String, String), CompileError> {
    let Some((last, first)) = name.split_once(", ") else {
        return Err(CompileError::MalformedName(format!(
            "name {name:?} is not in \"Last, First\" form"
        )));
    };
    Ok((last.to_string(), first.to_string()))
}

/// Reads the roster into StudentRecords with lower-cased keys. Duplicate
/// net ids or emails after lower-casing are rejected, never merged.
fn normalize_roster(roster: &Table) -> Result<Vec<StudentRecord>, CompileError> {
    let id_col = require_identity_column(roster, ROSTER_ID)?;
    let email_col = require_identity_column(roster, ROSTER_EMAIL)?;
    let name_col = roster.column(ROSTER_NAME).ok_or_else(|| {
        CompileError::MalformedName(format!("roster is missing column {ROSTER_NAME:?}"))
    })?;
    let group_col = roster.column(ROSTER_GROUP).ok_or_else(|| {
        CompileError::MalformedIdentifier(format!("roster is missing column {ROSTER_GROUP:?}"))
    })?;

    let mut seen_ids: HashSet<String> = HashSet::new();
    let mut seen_emails: HashSet<String> = HashSet::new();
    let mut records = Vec::with_capacity(roster.len());
    for row in 0..roster.len() {
        let net_id = roster
            .str_cell(row, id_col)
            .ok_or_else(|| {
                CompileError::MalformedIdentifier(format!(
                    "roster row {row} has no usable {ROSTER_ID:?} cell"
                ))
            })?
            .to_lowercase();
        let email = roster
            .str_cell(row, email_col)
            .ok_or_else(|| {
                CompileError::MalformedIdentifier(format!(
                    "roster row {row} has no usable {ROSTER_EMAIL:?} cell"
                ))
            })?
            .to_lowercase();
        if !seen_ids.insert(net_id.clone()) {
            return Err(CompileError::MalformedIdentifier(format!(
                "duplicate net id {net_id:?} after lower-casing"
            )));
        }
        if !seen_emails.insert(email.clone()) {
            return Err(CompileError::MalformedIdentifier(format!(
                "duplicate email address {email:?} after lower-casing"
            )));
        }

        let name = roster.str_cell(row, name_col).ok_or_else(|| {
            CompileError::MalformedName(format!(
                "roster row {row} has no usable {ROSTER_NAME:?} cell"
            ))
        })?;
        let (last_name, first_name) = split_name(name)?;
        let group = roster.int_cell(row, group_col).ok_or_else(|| {
            CompileError::MalformedIdentifier(format!(
                "roster row {row} has no integer {ROSTER_GROUP:?} cell"
            ))
        })?;

        records.push(StudentRecord {
            net_id,
            last_name,
            first_name,
            email,
            group,
        });
    }
    Ok(records)
}

fn require_identity_column(roster: &Table, column: &str) -> Result<usize, CompileError> {
    roster.column(column).ok_or_else(|| {
        CompileError::MalformedIdentifier(format!("roster is missing column {column:?}"))
    })
}

/// Lower-cased SID -> row in the homework/exam table.
fn index_score_rows(homework_exams: &Table) -> Result<HashMap<String, usize>, CompileError> {
    let sid_col = homework_exams
        .column(SCORES_ID)
        .ok_or(CompileError::MissingJoinKey {
            table: "homework/exam",
            column: SCORES_ID,
        })?;

    let mut by_sid: HashMap<String, usize> = HashMap::new();
    for row in 0..homework_exams.len() {
        let sid = homework_exams
            .str_cell(row, sid_col)
            .ok_or_else(|| {
                CompileError::MalformedIdentifier(format!(
                    "homework/exam row {row} has no usable {SCORES_ID:?} cell"
                ))
            })?
            .to_lowercase();
        if by_sid.insert(sid.clone(), row).is_some() {
            return Err(CompileError::MalformedIdentifier(format!(
                "duplicate sid {sid:?} after lower-casing"
            )));
        }
    }
    Ok(by_sid)
}

/// Assembles all quiz tables column-wise: lower-cased email -> achieved
/// points per quiz number. Person-name columns are ignored; a student
/// absent from a quiz table simply has no entry for that quiz.
fn index_quiz_points(
    quizzes: &BTreeMap<u32, Table>,
) -> Result<HashMap<String, BTreeMap<u32, f64>>, CompileError> {
    let mut by_email: HashMap<String, BTreeMap<u32, f64>> = HashMap::new();
    for (&number, table) in quizzes {
        let email_col = table.column(QUIZ_EMAIL).ok_or(CompileError::MissingJoinKey {
            table: "quiz",
            column: QUIZ_EMAIL,
        })?;
        let grade_col = table.column(QUIZ_GRADE).ok_or_else(|| {
            CompileError::MalformedScore(format!(
                "quiz {number} table is missing column {QUIZ_GRADE:?}"
            ))
        })?;
        for row in 0..table.len() {
            let email = table
                .str_cell(row, email_col)
                .ok_or_else(|| {
                    CompileError::MalformedIdentifier(format!(
                        "quiz {number} row {row} has no usable {QUIZ_EMAIL:?} cell"
                    ))
                })?
                .to_lowercase();
            let grade = table.num_cell(row, grade_col).ok_or_else(|| {
                CompileError::MalformedScore(format!(
                    "quiz {number} row {row} has a non-numeric {QUIZ_GRADE:?} cell"
                ))
            })?;
            by_email.entry(email).or_default().insert(number, grade);
        }
    }
    Ok(by_email)
}

fn fraction(table: &Table, row: usize, pair: &ScorePair) -> Result<f64, CompileError> {
    let raw_name = &table.columns[pair.raw_col];
    let raw = table.num_cell(row, pair.raw_col).ok_or_else(|| {
        CompileError::MalformedScore(format!(
            "row {row} has a non-numeric {raw_name:?} cell"
        ))
    })?;
    let max_name = &table.columns[pair.max_col];
    let max = table.num_cell(row, pair.max_col).ok_or_else(|| {
        CompileError::MalformedScore(format!(
            "row {row} has a non-numeric {max_name:?} cell"
        ))
    })?;
    if max <= 0.0 {
        return Err(CompileError::MalformedScore(format!(
            "row {row} has non-positive {max_name:?} value {max}"
        )));
    }
    Ok(raw / max)
}

/// Category average: mean of per-assignment fractions, not summed points
/// over summed maxes.
fn homework_mean(table: &Table, row: usize, pairs: &[ScorePair]) -> Result<f64, CompileError> {
    let mut sum = 0.0;
    for pair in pairs {
        sum += fraction(table, row, pair)?;
    }
    Ok(sum / pairs.len() as f64)
}

/// Compiles the final gradebook from caller-supplied tables. Inputs are
/// read-only snapshots; every stage builds fresh values.
pub fn generate_gradebook(
    roster: &Table,
    homework_exams: &Table,
    quizzes: &BTreeMap<u32, Table>,
    max_quiz_scores: &BTreeMap<u32, f64>,
) -> Result<Gradebook, CompileError> {
    let students = normalize_roster(roster)?;

    let schema = ScoreSchema::detect(homework_exams)?;
    if schema.homeworks.is_empty() {
        return Err(CompileError::NoHomeworkColumns);
    }
    let scores_by_sid = index_score_rows(homework_exams)?;
    let quiz_points = index_quiz_points(quizzes)?;

    // Global denominator: a quiz counts for everyone once it is configured,
    // whether or not a given student took it.
    let quiz_max_total: f64 = max_quiz_scores.values().sum();
    if !quizzes.is_empty() && quiz_max_total <= 0.0 {
        return Err(CompileError::InvalidQuizConfig(
            "quiz results supplied without positive max quiz scores".to_string(),
        ));
    }

    let mut gradebook = Gradebook::default();
    let mut group_slots: HashMap<i64, usize> = HashMap::new();
    let mut joined = 0usize;
    for student in &students {
        // Inner join: a student with no homework/exam row cannot be graded.
        let Some(&score_row) = scores_by_sid.get(&student.net_id) else {
            continue;
        };
        joined += 1;

        let homework_score = homework_mean(homework_exams, score_row, &schema.homeworks)?;
        let mut exam_scores = Vec::with_capacity(schema.exams.len());
        for pair in &schema.exams {
            exam_scores.push(ExamScore {
                number: pair.number,
                score: fraction(homework_exams, score_row, pair)?,
            });
        }

        // Left join on email: absent quiz data sums as 0 achieved points.
        let achieved: f64 = quiz_points
            .get(&student.email)
            .map(|by_quiz| by_quiz.values().sum())
            .unwrap_or(0.0);
        let quiz_score = if quiz_max_total > 0.0 {
            round_off_2_decimals(achieved / quiz_max_total)
        } else {
            0.0
        };

        let slot = *group_slots.entry(student.group).or_insert_with(|| {
            gradebook.groups.push(GroupGrades {
                group: student.group,
                rows: Vec::new(),
            });
            gradebook.groups.len() - 1
        });
        gradebook.groups[slot].rows.push(GradeRow {
            net_id: student.net_id.clone(),
            group: student.group,
            email_address: student.email.clone(),
            last_name: student.last_name.clone(),
            first_name: student.first_name.clone(),
            homework_score,
            exam_scores,
            quiz_score,
        });
    }

    debug!(
        students = students.len(),
        joined = joined,
        groups = gradebook.groups.len(),
        homeworks = schema.homeworks.len(),
        exams = schema.exams.len(),
        "gradebook compiled"
    );
    Ok(gradebook)
}
