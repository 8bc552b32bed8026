use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::compile::{self, Gradebook};
use crate::table::Table;

#[derive(Debug, Deserialize)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct OkResp {
    id: String,
    ok: bool,
    result: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct ErrObj {
    code: String,
    message: String,
}

#[derive(Debug, Serialize)]
struct ErrResp {
    id: String,
    ok: bool,
    error: ErrObj,
}

fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!(OkResp {
        id: id.to_string(),
        ok: true,
        result
    })
}

fn err(id: &str, code: &str, message: impl Into<String>) -> serde_json::Value {
    json!(ErrResp {
        id: id.to_string(),
        ok: false,
        error: ErrObj {
            code: code.to_string(),
            message: message.into(),
        }
    })
}

pub fn handle_request(req: Request) -> serde_json::Value {
    match req.method.as_str() {
        "health" => ok(&req.id, json!({ "version": env!("CARGO_PKG_VERSION") })),
        "gradebook.generate" => gradebook_generate(&req),
        _ => err(
            &req.id,
            "not_implemented",
            format!("unknown method: {}", req.method),
        ),
    }
}

fn gradebook_generate(req: &Request) -> serde_json::Value {
    let roster = match table_param(&req.params, "roster") {
        Ok(v) => v,
        Err(msg) => return err(&req.id, "bad_params", msg),
    };
    let homework_exams = match table_param(&req.params, "homeworkExams") {
        Ok(v) => v,
        Err(msg) => return err(&req.id, "bad_params", msg),
    };
    let quizzes = match quizzes_param(&req.params) {
        Ok(v) => v,
        Err(msg) => return err(&req.id, "bad_params", msg),
    };
    let max_quiz_scores = match max_quiz_scores_param(&req.params) {
        Ok(v) => v,
        Err(msg) => return err(&req.id, "bad_params", msg),
    };

    match compile::generate_gradebook(&roster, &homework_exams, &quizzes, &max_quiz_scores) {
        Ok(book) => ok(&req.id, gradebook_result(&book)),
        Err(e) => err(&req.id, e.code(), e.to_string()),
    }
}

fn table_param(params: &serde_json::Value, key: &str) -> Result<Table, String> {
    let Some(raw) = params.get(key) else {
        return Err(format!("missing params.{key}"));
    };
    serde_json::from_value(raw.clone()).map_err(|e| format!("params.{key}: {e}"))
}

/// `params.quizzes` is an object keyed by quiz number, one table per quiz.
fn quizzes_param(params: &serde_json::Value) -> Result<BTreeMap<u32, Table>, String> {
    let mut quizzes = BTreeMap::new();
    let Some(raw) = params.get("quizzes") else {
        return Ok(quizzes);
    };
    if raw.is_null() {
        return Ok(quizzes);
    }
    let Some(obj) = raw.as_object() else {
        return Err("params.quizzes must be an object keyed by quiz number".to_string());
    };
    for (key, value) in obj {
        let number: u32 = key
            .parse()
            .map_err(|_| format!("params.quizzes key {key:?} is not a quiz number"))?;
        let table: Table = serde_json::from_value(value.clone())
            .map_err(|e| format!("params.quizzes[{key}]: {e}"))?;
        quizzes.insert(number, table);
    }
    Ok(quizzes)
}

fn max_quiz_scores_param(params: &serde_json::Value) -> Result<BTreeMap<u32, f64>, String> {
    let mut maxes = BTreeMap::new();
    let Some(raw) = params.get("maxQuizScores") else {
        return Ok(maxes);
    };
    if raw.is_null() {
        return Ok(maxes);
    }
    let Some(obj) = raw.as_object() else {
        return Err("params.maxQuizScores must be an object keyed by quiz number".to_string());
    };
    for (key, value) in obj {
        let number: u32 = key
            .parse()
            .map_err(|_| format!("params.maxQuizScores key {key:?} is not a quiz number"))?;
        let Some(points) = value.as_f64() else {
            return Err(format!("params.maxQuizScores[{key}] must be a number"));
        };
        maxes.insert(number, points);
    }
    Ok(maxes)
}

/// Rows go out flat, one `exam_<n>_score` key per observed exam, matching
/// the report columns the frontend renders.
fn gradebook_result(book: &Gradebook) -> serde_json::Value {
    let groups: Vec<serde_json::Value> = book
        .groups
        .iter()
        .map(|g| {
            let rows: Vec<serde_json::Value> = g.rows.iter().map(grade_row_json).collect();
            json!({ "group": g.group, "rows": rows })
        })
        .collect();
    json!({ "groups": groups })
}

fn grade_row_json(row: &compile::GradeRow) -> serde_json::Value {
    let mut out = json!({
        "net_id": row.net_id,
        "group": row.group,
        "email_address": row.email_address,
        "last_name": row.last_name,
        "first_name": row.first_name,
        "homework_score": row.homework_score,
        "quiz_score": row.quiz_score,
    });
    for exam in &row.exam_scores {
        out[format!("exam_{}_score", exam.number)] = json!(exam.score);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(method: &str, params: serde_json::Value) -> Request {
        Request {
            id: "t1".to_string(),
            method: method.to_string(),
            params,
        }
    }

    #[test]
    fn health_reports_version() {
        let resp = handle_request(request("health", json!({})));
        assert_eq!(resp["ok"], json!(true));
        assert_eq!(resp["result"]["version"], json!(env!("CARGO_PKG_VERSION")));
    }

    #[test]
    fn unknown_method_is_not_implemented() {
        let resp = handle_request(request("gradebook.destroy", json!({})));
        assert_eq!(resp["ok"], json!(false));
        assert_eq!(resp["error"]["code"], json!("not_implemented"));
    }

    #[test]
    fn generate_requires_roster_param() {
        let resp = handle_request(request("gradebook.generate", json!({})));
        assert_eq!(resp["error"]["code"], json!("bad_params"));
    }

    #[test]
    fn generate_rejects_non_numeric_quiz_keys() {
        let resp = handle_request(request(
            "gradebook.generate",
            json!({
                "roster": { "columns": [], "rows": [] },
                "homeworkExams": { "columns": [], "rows": [] },
                "quizzes": { "first": { "columns": [], "rows": [] } }
            }),
        ));
        assert_eq!(resp["error"]["code"], json!("bad_params"));
    }

    #[test]
    fn generate_maps_compile_errors_to_codes() {
        let params = json!({
            "roster": {
                "columns": ["Name", "NetID", "Email Address", "Group"],
                "rows": [["Doe, John", "JXD12345", "JOHN.DOE@EXAMPLE.EDU", 1]]
            },
            "homeworkExams": {
                "columns": ["SID", "exam_1", "exam_1_max_points"],
                "rows": [["jxd12345", 95, 100]]
            }
        });
        let resp = handle_request(request("gradebook.generate", params));
        assert_eq!(resp["ok"], json!(false));
        assert_eq!(resp["error"]["code"], json!("no_homework_columns"));
    }

    #[test]
    fn generate_flattens_exam_scores_into_row_keys() {
        let params = json!({
            "roster": {
                "columns": ["Name", "NetID", "Email Address", "Group"],
                "rows": [["Doe, John", "JXD12345", "JOHN.DOE@EXAMPLE.EDU", 1]]
            },
            "homeworkExams": {
                "columns": [
                    "SID",
                    "homework_1", "homework_1_max_points",
                    "exam_1", "exam_1_max_points",
                    "exam_2", "exam_2_max_points"
                ],
                "rows": [["jxd12345", 25, 50, 95, 100, 90, 100]]
            }
        });
        let resp = handle_request(request("gradebook.generate", params));
        assert_eq!(resp["ok"], json!(true));
        let row = &resp["result"]["groups"][0]["rows"][0];
        assert_eq!(row["net_id"], json!("jxd12345"));
        assert_eq!(row["group"], json!(1));
        assert!((row["exam_1_score"].as_f64().expect("exam_1") - 0.95).abs() < 1e-9);
        assert!((row["exam_2_score"].as_f64().expect("exam_2") - 0.90).abs() < 1e-9);
        assert!((row["homework_score"].as_f64().expect("homework") - 0.5).abs() < 1e-9);
        assert_eq!(row["quiz_score"], json!(0.0));
    }
}
