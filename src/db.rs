use anyhow::{bail, Context};
use chrono::{Duration, NaiveDate, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::{debug, info};

use crate::models::{
    ActivityFacts, AssignmentFacts, AttendanceFacts, EngagementFacts, NewStudent,
    NotificationSettings, StreamConfig, StreamStudents, Student, StudentUpdate, WeekWindow,
    WeeklyFacts,
};
use crate::store::TutorStore;

/// Hours of study credited per assignment in the window. A stand-in until
/// study time is actually tracked.
const STUDY_HOURS_PER_ASSIGNMENT: f64 = 2.0;

const STUDENT_COLUMNS: &str = "student_id, name, phone, telegram_user_id, telegram_username, \
     is_active, course_program_id, created_at, updated_at, last_login_at";

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let students = vec![
        ("Avery Lee", "+15550100001", Some(100001_i64), Some("avery_lee")),
        ("Jules Moreno", "+15550100002", Some(100002), None),
        ("Kiara Patel", "+15550100003", None, Some("kiara")),
    ];

    let mut student_ids = Vec::new();
    for (name, phone, telegram_id, username) in students {
        let id: i64 = sqlx::query(
            r#"
            INSERT INTO tutor.students (name, phone, telegram_user_id, telegram_username)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (phone) DO UPDATE
            SET name = EXCLUDED.name, updated_at = now()
            RETURNING student_id
            "#,
        )
        .bind(name)
        .bind(phone)
        .bind(telegram_id)
        .bind(username)
        .fetch_one(pool)
        .await?
        .get("student_id");
        student_ids.push(id);
    }

    let today = Utc::now().date_naive();
    let week = WeekWindow::previous(today);
    let stream_id: i64 = sqlx::query(
        r#"
        INSERT INTO tutor.streams (name, program_id, start_date, end_date)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (name) DO UPDATE SET end_date = EXCLUDED.end_date
        RETURNING stream_id
        "#,
    )
    .bind("Spring cohort")
    .bind(1_i64)
    .bind(week.start - Duration::days(28))
    .bind(today + Duration::days(60))
    .fetch_one(pool)
    .await?
    .get("stream_id");

    for student_id in &student_ids {
        sqlx::query(
            "INSERT INTO tutor.stream_students (stream_id, student_id) VALUES ($1, $2) \
             ON CONFLICT DO NOTHING",
        )
        .bind(stream_id)
        .bind(student_id)
        .execute(pool)
        .await?;
    }

    for (offset, completed) in [(0_i64, true), (2, true), (4, false)] {
        sqlx::query(
            r#"
            INSERT INTO tutor.schedules (stream_id, scheduled_date, is_completed, source_key)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (source_key) DO NOTHING
            "#,
        )
        .bind(stream_id)
        .bind(week.start + Duration::days(offset))
        .bind(completed)
        .bind(format!("seed-class-{}-{offset}", week.start))
        .execute(pool)
        .await?;
    }

    // (student index, status, grade, submitted days after deadline)
    let assignments = [
        (0_usize, "completed", Some(92.0), Some(-1_i64)),
        (0, "completed", Some(88.0), Some(0)),
        (1, "completed", Some(61.0), Some(2)),
        (1, "pending", None, None),
        (2, "pending", None, None),
    ];
    let deadline = week.start.and_hms_opt(18, 0, 0).context("invalid deadline")?.and_utc()
        + Duration::days(3);
    for (index, &(student, status, grade, late_by)) in assignments.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO tutor.assignments
            (student_id, status, grade, deadline, submitted_at, created_at, source_key)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (source_key) DO NOTHING
            "#,
        )
        .bind(student_ids[student])
        .bind(status)
        .bind(grade)
        .bind(deadline)
        .bind(late_by.map(|days| deadline + Duration::days(days)))
        .bind(deadline - Duration::days(2))
        .bind(format!("seed-assignment-{}-{index}", week.start))
        .execute(pool)
        .await?;
    }

    let existing: i64 = sqlx::query(
        "SELECT COUNT(*) AS n FROM tutor.messages WHERE sender_id = $1 AND created_at::date BETWEEN $2 AND $3",
    )
    .bind(student_ids[0])
    .bind(week.start)
    .bind(week.end)
    .fetch_one(pool)
    .await?
    .get("n");

    if existing == 0 {
        let chats = [
            (0_usize, "How do I submit the second essay?"),
            (0, "Thanks, got it"),
            (0, "Is the quiz open-book?"),
            (1, "When is the next class?"),
        ];
        for (student, text) in chats {
            sqlx::query(
                r#"
                INSERT INTO tutor.messages (chat_id, sender_type, sender_id, text_content, created_at)
                VALUES ($1, 'user', $2, $3, $4)
                "#,
            )
            .bind(900_i64)
            .bind(student_ids[student])
            .bind(text)
            .bind(deadline - Duration::days(1))
            .execute(pool)
            .await?;
        }
    }

    info!(students = student_ids.len(), stream_id, "seed data ready");
    Ok(())
}

fn student_from_row(row: &PgRow) -> Student {
    Student {
        student_id: row.get("student_id"),
        name: row.get("name"),
        phone: row.get("phone"),
        telegram_user_id: row.get("telegram_user_id"),
        telegram_username: row.get("telegram_username"),
        is_active: row.get("is_active"),
        course_program_id: row.get("course_program_id"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        last_login_at: row.get("last_login_at"),
    }
}

/// Returns one page of students plus the number matching the filters overall.
pub async fn list_students(
    pool: &PgPool,
    is_active: Option<bool>,
    course_program_id: Option<i64>,
    skip: i64,
    limit: i64,
) -> anyhow::Result<(Vec<Student>, i64)> {
    let filter = "WHERE ($1::boolean IS NULL OR is_active = $1) \
                  AND ($2::bigint IS NULL OR course_program_id = $2)";

    let rows = sqlx::query(&format!(
        "SELECT {STUDENT_COLUMNS} FROM tutor.students {filter} \
         ORDER BY student_id OFFSET $3 LIMIT $4"
    ))
    .bind(is_active)
    .bind(course_program_id)
    .bind(skip.max(0))
    .bind(limit.clamp(1, 1000))
    .fetch_all(pool)
    .await?;

    let total: i64 = sqlx::query(&format!("SELECT COUNT(*) AS total FROM tutor.students {filter}"))
        .bind(is_active)
        .bind(course_program_id)
        .fetch_one(pool)
        .await?
        .get("total");

    Ok((rows.iter().map(student_from_row).collect(), total))
}

pub async fn get_student(pool: &PgPool, student_id: i64) -> anyhow::Result<Option<Student>> {
    let row = sqlx::query(&format!(
        "SELECT {STUDENT_COLUMNS} FROM tutor.students WHERE student_id = $1"
    ))
    .bind(student_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.as_ref().map(student_from_row))
}

pub async fn get_student_by_telegram(
    pool: &PgPool,
    telegram_user_id: i64,
) -> anyhow::Result<Option<Student>> {
    let row = sqlx::query(&format!(
        "SELECT {STUDENT_COLUMNS} FROM tutor.students WHERE telegram_user_id = $1"
    ))
    .bind(telegram_user_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.as_ref().map(student_from_row))
}

pub async fn create_student(pool: &PgPool, student: &NewStudent) -> anyhow::Result<Student> {
    student.validate()?;

    let taken = sqlx::query("SELECT 1 FROM tutor.students WHERE phone = $1")
        .bind(&student.phone)
        .fetch_optional(pool)
        .await?;
    if taken.is_some() {
        bail!("a student with phone {} already exists", student.phone);
    }

    let row = sqlx::query(&format!(
        r#"
        INSERT INTO tutor.students
        (name, phone, telegram_user_id, telegram_username, is_active, course_program_id)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING {STUDENT_COLUMNS}
        "#
    ))
    .bind(&student.name)
    .bind(&student.phone)
    .bind(student.telegram_user_id)
    .bind(&student.telegram_username)
    .bind(student.is_active)
    .bind(student.course_program_id)
    .fetch_one(pool)
    .await?;

    let created = student_from_row(&row);
    info!(student_id = created.student_id, "student created");
    Ok(created)
}

pub async fn update_student(
    pool: &PgPool,
    student_id: i64,
    update: &StudentUpdate,
) -> anyhow::Result<Option<Student>> {
    update.validate()?;

    let row = sqlx::query(&format!(
        r#"
        UPDATE tutor.students SET
            name = COALESCE($2, name),
            phone = COALESCE($3, phone),
            telegram_user_id = COALESCE($4, telegram_user_id),
            telegram_username = COALESCE($5, telegram_username),
            is_active = COALESCE($6, is_active),
            course_program_id = COALESCE($7, course_program_id),
            updated_at = now()
        WHERE student_id = $1
        RETURNING {STUDENT_COLUMNS}
        "#
    ))
    .bind(student_id)
    .bind(&update.name)
    .bind(&update.phone)
    .bind(update.telegram_user_id)
    .bind(&update.telegram_username)
    .bind(update.is_active)
    .bind(update.course_program_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.as_ref().map(student_from_row))
}

/// Soft delete: the student row stays, flagged inactive.
pub async fn deactivate_student(pool: &PgPool, student_id: i64) -> anyhow::Result<bool> {
    let result = sqlx::query(
        "UPDATE tutor.students SET is_active = FALSE, updated_at = now() WHERE student_id = $1",
    )
    .bind(student_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn fetch_weekly_facts(
    pool: &PgPool,
    student_id: i64,
    week: WeekWindow,
) -> anyhow::Result<WeeklyFacts> {
    let assignments = sqlx::query(
        r#"
        SELECT COUNT(*) AS total,
               COUNT(*) FILTER (WHERE status = 'completed') AS completed,
               COUNT(*) FILTER (WHERE status = 'completed' AND submitted_at <= deadline) AS on_time,
               COUNT(*) FILTER (WHERE status = 'completed' AND submitted_at > deadline) AS late,
               AVG(grade) AS average_grade
        FROM tutor.assignments
        WHERE student_id = $1 AND created_at::date BETWEEN $2 AND $3
        "#,
    )
    .bind(student_id)
    .bind(week.start)
    .bind(week.end)
    .fetch_one(pool)
    .await
    .context("failed to aggregate assignments")?;

    let activity = sqlx::query(
        r#"
        SELECT COUNT(*) AS messages_sent,
               COUNT(*) FILTER (WHERE text_content IS NOT NULL) AS questions_asked,
               MAX(created_at) AS last_activity
        FROM tutor.messages
        WHERE sender_id = $1 AND sender_type = 'user'
          AND created_at::date BETWEEN $2 AND $3
        "#,
    )
    .bind(student_id)
    .bind(week.start)
    .bind(week.end)
    .fetch_one(pool)
    .await
    .context("failed to aggregate messages")?;

    let attendance = sqlx::query(
        r#"
        SELECT COUNT(*) AS scheduled_classes,
               COUNT(*) FILTER (WHERE sc.is_completed) AS attended
        FROM tutor.schedules sc
        WHERE sc.stream_id IN (
            SELECT stream_id FROM tutor.stream_students WHERE student_id = $1
        )
          AND sc.scheduled_date BETWEEN $2 AND $3
        "#,
    )
    .bind(student_id)
    .bind(week.start)
    .bind(week.end)
    .fetch_one(pool)
    .await
    .context("failed to aggregate attendance")?;

    let total: i64 = assignments.get("total");
    let average_grade: Option<f64> = assignments.get("average_grade");
    let average_grade = average_grade.unwrap_or(0.0);

    let facts = WeeklyFacts {
        student_id,
        week_start: week.start,
        week_end: week.end,
        assignments: AssignmentFacts {
            total,
            completed: assignments.get("completed"),
            on_time: assignments.get("on_time"),
            late: assignments.get("late"),
            average_grade,
        },
        activity: ActivityFacts {
            messages_sent: activity.get("messages_sent"),
            questions_asked: activity.get("questions_asked"),
            last_activity: activity.get("last_activity"),
        },
        attendance: AttendanceFacts {
            scheduled_classes: attendance.get("scheduled_classes"),
            attended: attendance.get("attended"),
        },
        engagement: EngagementFacts {
            study_hours: total as f64 * STUDY_HOURS_PER_ASSIGNMENT,
            materials_viewed: total,
            participation_score: average_grade,
        },
    };

    debug!(student_id, week = %week, "weekly facts loaded");
    Ok(facts)
}

/// Streams that have not ended yet, with their notification settings.
pub async fn list_active_streams(
    pool: &PgPool,
    today: NaiveDate,
) -> anyhow::Result<Vec<StreamConfig>> {
    let rows = sqlx::query(
        r#"
        SELECT s.stream_id, s.name, s.program_id, s.start_date, s.end_date,
               c.notification_enabled, c.frequency, c.day_of_week, c.time,
               c.student_limit, c.language, c.tone, c.dry_run_enabled
        FROM tutor.streams s
        LEFT JOIN tutor.stream_notification_configs c ON c.stream_id = s.stream_id
        WHERE s.end_date >= $1
        ORDER BY s.start_date, s.stream_id
        "#,
    )
    .bind(today)
    .fetch_all(pool)
    .await?;

    let mut streams = Vec::new();
    for row in rows {
        let enabled: Option<bool> = row.get("notification_enabled");
        let notification_settings = match enabled {
            Some(enabled) => NotificationSettings {
                enabled,
                frequency: row.get("frequency"),
                day_of_week: row.get("day_of_week"),
                time: row.get("time"),
                student_limit: row.get("student_limit"),
                language: row.get("language"),
                tone: row.get("tone"),
                dry_run: row.get("dry_run_enabled"),
            },
            None => NotificationSettings::default(),
        };
        let end_date: NaiveDate = row.get("end_date");

        streams.push(StreamConfig {
            stream_id: row.get("stream_id"),
            name: row.get("name"),
            program_id: row.get("program_id"),
            start_date: row.get("start_date"),
            end_date,
            is_active: end_date >= today,
            notification_settings,
        });
    }

    Ok(streams)
}

pub async fn stream_exists(pool: &PgPool, stream_id: i64) -> anyhow::Result<bool> {
    let row = sqlx::query("SELECT 1 FROM tutor.streams WHERE stream_id = $1")
        .bind(stream_id)
        .fetch_optional(pool)
        .await?;
    Ok(row.is_some())
}

pub async fn stream_students(pool: &PgPool, stream_id: i64) -> anyhow::Result<StreamStudents> {
    if !stream_exists(pool, stream_id).await? {
        bail!("stream {stream_id} not found");
    }

    let rows = sqlx::query(
        r#"
        SELECT st.student_id, st.name, st.phone, st.telegram_user_id, st.telegram_username,
               st.is_active, st.course_program_id, st.created_at, st.updated_at, st.last_login_at
        FROM tutor.students st
        JOIN tutor.stream_students ss ON ss.student_id = st.student_id
        WHERE ss.stream_id = $1
        ORDER BY st.student_id
        "#,
    )
    .bind(stream_id)
    .fetch_all(pool)
    .await?;

    let students: Vec<Student> = rows.iter().map(student_from_row).collect();
    let active_count = students.iter().filter(|student| student.is_active).count();

    Ok(StreamStudents {
        stream_id,
        total_count: students.len(),
        active_count,
        students,
    })
}

/// [`TutorStore`] backed by the Postgres schema.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl TutorStore for PgStore {
    async fn find_student(&self, student_id: i64) -> anyhow::Result<Option<Student>> {
        get_student(&self.pool, student_id).await
    }

    async fn weekly_facts(
        &self,
        student_id: i64,
        week: WeekWindow,
    ) -> anyhow::Result<WeeklyFacts> {
        fetch_weekly_facts(&self.pool, student_id, week).await
    }
}
