use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use anyhow::{bail, ensure};
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::rating::{Category, SubScores};

/// Inclusive date window a rating is computed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeekWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl WeekWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> anyhow::Result<Self> {
        ensure!(start <= end, "week start {start} is after week end {end}");
        Ok(Self { start, end })
    }

    /// Monday through Sunday of the week before the one containing `today`.
    pub fn previous(today: NaiveDate) -> Self {
        let offset = i64::from(today.weekday().num_days_from_monday()) + 7;
        let start = today - Duration::days(offset);
        Self {
            start,
            end: start + Duration::days(6),
        }
    }

    /// The `days` days ending on `today`.
    pub fn trailing(today: NaiveDate, days: i64) -> Self {
        Self {
            start: today - Duration::days(days.max(1)),
            end: today,
        }
    }
}

impl fmt::Display for WeekWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} to {}", self.start, self.end)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssignmentFacts {
    pub total: i64,
    pub completed: i64,
    pub on_time: i64,
    pub late: i64,
    pub average_grade: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActivityFacts {
    pub messages_sent: i64,
    pub questions_asked: i64,
    pub last_activity: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttendanceFacts {
    pub scheduled_classes: i64,
    pub attended: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngagementFacts {
    pub study_hours: f64,
    pub materials_viewed: i64,
    pub participation_score: f64,
}

/// Behavioral facts for one student over one week window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeeklyFacts {
    pub student_id: i64,
    pub week_start: NaiveDate,
    pub week_end: NaiveDate,
    pub assignments: AssignmentFacts,
    pub activity: ActivityFacts,
    pub attendance: AttendanceFacts,
    pub engagement: EngagementFacts,
}

impl WeeklyFacts {
    pub fn empty(student_id: i64, week: WeekWindow) -> Self {
        Self {
            student_id,
            week_start: week.start,
            week_end: week.end,
            assignments: AssignmentFacts::default(),
            activity: ActivityFacts::default(),
            attendance: AttendanceFacts::default(),
            engagement: EngagementFacts::default(),
        }
    }

    /// Share of scheduled classes attended; 0.0 when nothing was scheduled.
    pub fn attendance_rate(&self) -> f64 {
        if self.attendance.scheduled_classes > 0 {
            self.attendance.attended as f64 / self.attendance.scheduled_classes as f64
        } else {
            0.0
        }
    }
}

/// One line of a facts CSV file. Blank numeric cells count as zero.
#[derive(Debug, Deserialize)]
pub struct FactsRow {
    pub student_id: i64,
    pub week_start: NaiveDate,
    pub week_end: NaiveDate,
    pub assignments_total: Option<i64>,
    pub assignments_completed: Option<i64>,
    pub assignments_on_time: Option<i64>,
    pub assignments_late: Option<i64>,
    pub average_grade: Option<f64>,
    pub messages_sent: Option<i64>,
    pub questions_asked: Option<i64>,
    pub scheduled_classes: Option<i64>,
    pub attended_classes: Option<i64>,
    pub study_hours: Option<f64>,
    pub materials_viewed: Option<i64>,
    pub participation_score: Option<f64>,
}

impl TryFrom<FactsRow> for WeeklyFacts {
    type Error = anyhow::Error;

    fn try_from(row: FactsRow) -> anyhow::Result<Self> {
        let week = WeekWindow::new(row.week_start, row.week_end)?;
        Ok(Self {
            student_id: row.student_id,
            week_start: week.start,
            week_end: week.end,
            assignments: AssignmentFacts {
                total: row.assignments_total.unwrap_or(0),
                completed: row.assignments_completed.unwrap_or(0),
                on_time: row.assignments_on_time.unwrap_or(0),
                late: row.assignments_late.unwrap_or(0),
                average_grade: row.average_grade.unwrap_or(0.0),
            },
            activity: ActivityFacts {
                messages_sent: row.messages_sent.unwrap_or(0),
                questions_asked: row.questions_asked.unwrap_or(0),
                last_activity: None,
            },
            attendance: AttendanceFacts {
                scheduled_classes: row.scheduled_classes.unwrap_or(0),
                attended: row.attended_classes.unwrap_or(0),
            },
            engagement: EngagementFacts {
                study_hours: row.study_hours.unwrap_or(0.0),
                materials_viewed: row.materials_viewed.unwrap_or(0),
                participation_score: row.participation_score.unwrap_or(0.0),
            },
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeeklyRating {
    pub student_id: i64,
    pub week_start: NaiveDate,
    pub week_end: NaiveDate,
    pub weekly_score: f64,
    #[serde(flatten)]
    pub scores: SubScores,
    pub category: Category,
    pub recommendations: Vec<String>,
    pub personal_message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Student {
    pub student_id: i64,
    pub name: String,
    pub phone: String,
    pub telegram_user_id: Option<i64>,
    pub telegram_username: Option<String>,
    pub is_active: bool,
    pub course_program_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_login_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewStudent {
    pub name: String,
    pub phone: String,
    pub telegram_user_id: Option<i64>,
    pub telegram_username: Option<String>,
    pub is_active: bool,
    pub course_program_id: Option<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct StudentUpdate {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub telegram_user_id: Option<i64>,
    pub telegram_username: Option<String>,
    pub is_active: Option<bool>,
    pub course_program_id: Option<i64>,
}

fn phone_pattern() -> &'static Regex {
    static PHONE: OnceLock<Regex> = OnceLock::new();
    PHONE.get_or_init(|| Regex::new(r"^\+?[1-9]\d{1,14}$").expect("phone pattern compiles"))
}

fn check_name(name: &str) -> anyhow::Result<()> {
    let len = name.chars().count();
    ensure!((1..=100).contains(&len), "name must be 1-100 characters");
    Ok(())
}

fn check_phone(phone: &str) -> anyhow::Result<()> {
    ensure!(
        phone_pattern().is_match(phone),
        "phone `{phone}` is not an international number"
    );
    Ok(())
}

fn check_telegram_username(username: Option<&str>) -> anyhow::Result<()> {
    if let Some(value) = username {
        ensure!(
            value.chars().count() <= 50,
            "telegram username must be at most 50 characters"
        );
    }
    Ok(())
}

impl NewStudent {
    pub fn validate(&self) -> anyhow::Result<()> {
        check_name(&self.name)?;
        check_phone(&self.phone)?;
        check_telegram_username(self.telegram_username.as_deref())
    }
}

impl StudentUpdate {
    pub fn validate(&self) -> anyhow::Result<()> {
        if let Some(name) = &self.name {
            check_name(name)?;
        }
        if let Some(phone) = &self.phone {
            check_phone(phone)?;
        }
        check_telegram_username(self.telegram_username.as_deref())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StudentStats {
    pub student_id: i64,
    pub total_assignments: i64,
    pub completed_assignments: i64,
    pub average_grade: Option<f64>,
    pub messages_count: i64,
    pub attendance_rate: f64,
    pub study_hours: f64,
    pub last_activity: Option<DateTime<Utc>>,
}

impl From<&WeeklyFacts> for StudentStats {
    fn from(facts: &WeeklyFacts) -> Self {
        Self {
            student_id: facts.student_id,
            total_assignments: facts.assignments.total,
            completed_assignments: facts.assignments.completed,
            average_grade: (facts.assignments.average_grade > 0.0)
                .then_some(facts.assignments.average_grade),
            messages_count: facts.activity.messages_sent,
            attendance_rate: facts.attendance_rate(),
            study_hours: facts.engagement.study_hours,
            last_activity: facts.activity.last_activity,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NotificationSettings {
    pub enabled: bool,
    pub frequency: String,
    pub day_of_week: Option<i32>,
    pub time: Option<NaiveTime>,
    pub student_limit: Option<i32>,
    pub language: String,
    pub tone: String,
    pub dry_run: bool,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            frequency: "weekly".to_string(),
            day_of_week: Some(1),
            time: NaiveTime::from_hms_opt(10, 0, 0),
            student_limit: None,
            language: "ru".to_string(),
            tone: "friendly".to_string(),
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StreamConfig {
    pub stream_id: i64,
    pub name: String,
    pub program_id: i64,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub is_active: bool,
    pub notification_settings: NotificationSettings,
}

#[derive(Debug, Clone, Serialize)]
pub struct StreamStudents {
    pub stream_id: i64,
    pub students: Vec<Student>,
    pub total_count: usize,
    pub active_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum MaterialCategory {
    Lecture,
    Assignment,
    Methodical,
}

impl MaterialCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            MaterialCategory::Lecture => "lecture",
            MaterialCategory::Assignment => "assignment",
            MaterialCategory::Methodical => "methodical",
        }
    }
}

impl FromStr for MaterialCategory {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> anyhow::Result<Self> {
        match value {
            "lecture" => Ok(MaterialCategory::Lecture),
            "assignment" => Ok(MaterialCategory::Assignment),
            "methodical" => Ok(MaterialCategory::Methodical),
            other => bail!("unknown material category `{other}`"),
        }
    }
}

impl fmt::Display for MaterialCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CourseMaterial {
    pub material_id: i64,
    pub lesson_id: i64,
    pub title: String,
    pub content: Option<String>,
    pub file_path: Option<String>,
    pub material_type: Option<String>,
    pub material_category: MaterialCategory,
    pub is_public: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewMaterial {
    pub lesson_id: i64,
    pub title: String,
    pub content: Option<String>,
    pub file_path: Option<String>,
    pub material_type: Option<String>,
    pub material_category: MaterialCategory,
    pub is_public: bool,
}

#[derive(Debug, Clone, Default)]
pub struct MaterialUpdate {
    pub title: Option<String>,
    pub content: Option<String>,
    pub file_path: Option<String>,
    pub material_type: Option<String>,
    pub material_category: Option<MaterialCategory>,
    pub is_public: Option<bool>,
}

fn check_material_fields(
    title: Option<&str>,
    file_path: Option<&str>,
    material_type: Option<&str>,
) -> anyhow::Result<()> {
    if let Some(title) = title {
        let len = title.chars().count();
        ensure!((1..=150).contains(&len), "title must be 1-150 characters");
    }
    if let Some(path) = file_path {
        ensure!(path.chars().count() <= 255, "file path must be at most 255 characters");
    }
    if let Some(kind) = material_type {
        ensure!(kind.chars().count() <= 50, "material type must be at most 50 characters");
    }
    Ok(())
}

impl NewMaterial {
    pub fn validate(&self) -> anyhow::Result<()> {
        check_material_fields(
            Some(&self.title),
            self.file_path.as_deref(),
            self.material_type.as_deref(),
        )
    }
}

impl MaterialUpdate {
    pub fn validate(&self) -> anyhow::Result<()> {
        check_material_fields(
            self.title.as_deref(),
            self.file_path.as_deref(),
            self.material_type.as_deref(),
        )
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MaterialsByCategory {
    pub lecture: Vec<CourseMaterial>,
    pub assignment: Vec<CourseMaterial>,
    pub methodical: Vec<CourseMaterial>,
}

impl MaterialsByCategory {
    pub fn group(materials: Vec<CourseMaterial>) -> Self {
        let mut grouped = Self::default();
        for material in materials {
            match material.material_category {
                MaterialCategory::Lecture => grouped.lecture.push(material),
                MaterialCategory::Assignment => grouped.assignment.push(material),
                MaterialCategory::Methodical => grouped.methodical.push(material),
            }
        }
        grouped
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MaterialStats {
    pub total: i64,
    pub by_category: Vec<(MaterialCategory, i64)>,
    pub public: i64,
    pub private: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SenderType {
    User,
    Bot,
}

impl SenderType {
    pub fn as_str(self) -> &'static str {
        match self {
            SenderType::User => "user",
            SenderType::Bot => "bot",
        }
    }
}

impl FromStr for SenderType {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> anyhow::Result<Self> {
        match value {
            "user" => Ok(SenderType::User),
            "bot" => Ok(SenderType::Bot),
            other => bail!("unknown sender type `{other}`"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub message_id: i64,
    pub telegram_message_id: Option<i64>,
    pub chat_id: i64,
    pub sender_type: SenderType,
    pub sender_id: Option<i64>,
    pub text_content: Option<String>,
    pub attachment_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub telegram_message_id: Option<i64>,
    pub chat_id: i64,
    pub sender_type: SenderType,
    pub sender_id: Option<i64>,
    pub text_content: Option<String>,
    pub attachment_url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BotResponse {
    pub response_id: i64,
    pub message_id: i64,
    pub text_content: Option<String>,
    pub attachment_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageWithResponses {
    #[serde(flatten)]
    pub message: Message,
    pub bot_responses: Vec<BotResponse>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatStats {
    pub chat_id: i64,
    pub total_messages: i64,
    pub user_messages: i64,
    pub bot_messages: i64,
    pub last_activity: Option<DateTime<Utc>>,
    pub active_users: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageStats {
    pub total_messages: i64,
    pub by_sender_type: Vec<(SenderType, i64)>,
    pub total_chats: i64,
    pub total_responses: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RankedStudent {
    pub student_id: i64,
    pub weekly_score: f64,
    pub category: Category,
}

#[derive(Debug, Clone, Serialize)]
pub struct AttentionStudent {
    pub student_id: i64,
    pub weekly_score: f64,
    pub category: Category,
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RatingFailure {
    pub student_id: i64,
    pub error: String,
}

/// A facts file line that could not be parsed, so has no student id.
#[derive(Debug, Clone, Serialize)]
pub struct UnreadableRow {
    pub line: usize,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct WeeklyReport {
    pub stream_id: i64,
    pub week_start: NaiveDate,
    pub week_end: NaiveDate,
    pub total_students: usize,
    pub rated_students: usize,
    pub average_rating: f64,
    pub top_performers: Vec<RankedStudent>,
    pub needs_attention: Vec<AttentionStudent>,
    pub failures: Vec<RatingFailure>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn sample_student() -> NewStudent {
        NewStudent {
            name: "Avery Lee".to_string(),
            phone: "+15551234567".to_string(),
            telegram_user_id: Some(42),
            telegram_username: Some("avery".to_string()),
            is_active: true,
            course_program_id: None,
        }
    }

    #[test]
    fn previous_week_runs_monday_to_sunday() {
        // 2026-10-18 is a Sunday.
        let week = WeekWindow::previous(date(2026, 10, 18));
        assert_eq!(week.start, date(2026, 10, 5));
        assert_eq!(week.end, date(2026, 10, 11));

        let week = WeekWindow::previous(date(2026, 10, 12));
        assert_eq!(week.start, date(2026, 10, 5));
    }

    #[test]
    fn window_rejects_reversed_dates() {
        assert!(WeekWindow::new(date(2026, 1, 7), date(2026, 1, 1)).is_err());
        assert!(WeekWindow::new(date(2026, 1, 1), date(2026, 1, 1)).is_ok());
    }

    #[test]
    fn attendance_rate_is_zero_without_classes() {
        let week = WeekWindow::previous(date(2026, 10, 18));
        let mut facts = WeeklyFacts::empty(1, week);
        assert_eq!(facts.attendance_rate(), 0.0);

        facts.attendance.scheduled_classes = 4;
        facts.attendance.attended = 3;
        assert!((facts.attendance_rate() - 0.75).abs() < 1e-9);
    }

    fn facts_row(line: &str) -> FactsRow {
        let data = format!(
            "student_id,week_start,week_end,assignments_total,assignments_completed,assignments_on_time,assignments_late,average_grade,messages_sent,questions_asked,scheduled_classes,attended_classes,study_hours,materials_viewed,participation_score\n{line}\n"
        );
        let mut reader = csv::Reader::from_reader(data.as_bytes());
        reader.deserialize().next().unwrap().unwrap()
    }

    #[test]
    fn csv_row_with_reversed_week_is_rejected() {
        let row = facts_row("3,2026-02-09,2026-02-02,1,1,1,0,90,1,0,1,1,1,1,1");
        let err = WeeklyFacts::try_from(row).unwrap_err();
        assert!(err.to_string().contains("is after week end"));

        let row = facts_row("3,2026-02-02,2026-02-02,,,,,,,,,,,,");
        let facts = WeeklyFacts::try_from(row).unwrap();
        assert_eq!(facts.week_start, facts.week_end);
    }

    #[test]
    fn blank_csv_cells_become_zero() {
        let row = facts_row("7,2026-01-05,2026-01-11,4,,,,,3,,,,,,");
        let facts = WeeklyFacts::try_from(row).unwrap();
        assert_eq!(facts.student_id, 7);
        assert_eq!(facts.assignments.total, 4);
        assert_eq!(facts.assignments.completed, 0);
        assert_eq!(facts.activity.messages_sent, 3);
        assert_eq!(facts.engagement.study_hours, 0.0);
    }

    #[test]
    fn student_validation_checks_phone_and_name() {
        assert!(sample_student().validate().is_ok());

        let mut bad_phone = sample_student();
        bad_phone.phone = "0123".to_string();
        assert!(bad_phone.validate().is_err());

        let mut empty_name = sample_student();
        empty_name.name = String::new();
        assert!(empty_name.validate().is_err());

        let update = StudentUpdate {
            telegram_username: Some("x".repeat(51)),
            ..StudentUpdate::default()
        };
        assert!(update.validate().is_err());
    }

    #[test]
    fn material_categories_parse_and_group() {
        assert_eq!(
            "methodical".parse::<MaterialCategory>().unwrap(),
            MaterialCategory::Methodical
        );
        assert!("video".parse::<MaterialCategory>().is_err());

        let material = |id, category| CourseMaterial {
            material_id: id,
            lesson_id: 1,
            title: format!("Material {id}"),
            content: None,
            file_path: None,
            material_type: None,
            material_category: category,
            is_public: false,
            created_at: Utc::now(),
        };
        let grouped = MaterialsByCategory::group(vec![
            material(1, MaterialCategory::Lecture),
            material(2, MaterialCategory::Assignment),
            material(3, MaterialCategory::Lecture),
        ]);
        assert_eq!(grouped.lecture.len(), 2);
        assert_eq!(grouped.assignment.len(), 1);
        assert!(grouped.methodical.is_empty());
    }

    #[test]
    fn material_title_length_is_bounded() {
        let update = MaterialUpdate {
            title: Some(String::new()),
            ..MaterialUpdate::default()
        };
        assert!(update.validate().is_err());
        assert!(MaterialUpdate::default().validate().is_ok());
    }
}
