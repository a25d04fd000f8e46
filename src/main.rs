use std::path::PathBuf;

use anyhow::{bail, Context};
use chrono::{NaiveDate, Utc};
use clap::{ArgGroup, Args, Parser, Subcommand};
use serde::Serialize;
use sqlx::PgPool;
use tracing::warn;

mod config;
mod db;
mod logging;
mod materials;
mod messages;
mod models;
mod rating;
mod report;
mod store;

use config::{DatabaseArgs, WeightArgs};
use models::{
    FactsRow, MaterialCategory, MaterialUpdate, NewMaterial, NewMessage, NewStudent,
    RatingFailure, SenderType, Student, StudentStats, StudentUpdate, UnreadableRow, WeekWindow,
    WeeklyFacts, WeeklyRating,
};
use report::RatingBatch;

#[derive(Parser)]
#[command(name = "tutor-rating", version)]
#[command(about = "Weekly student ratings and course data for the AI tutor platform", long_about = None)]
struct Cli {
    #[command(flatten)]
    database: DatabaseArgs,

    /// Print JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    /// Debug-level logging on stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load sample data for last week
    Seed,
    /// Manage students
    Students {
        #[command(subcommand)]
        command: StudentCommands,
    },
    /// Inspect running streams
    Streams {
        #[command(subcommand)]
        command: StreamCommands,
    },
    /// Manage course materials
    Materials {
        #[command(subcommand)]
        command: MaterialCommands,
    },
    /// Chat messages and bot responses
    Messages {
        #[command(subcommand)]
        command: MessageCommands,
    },
    /// Show the raw weekly facts for a student
    Facts {
        #[arg(long)]
        student: i64,
        #[command(flatten)]
        window: WindowArgs,
    },
    /// Rate students for a week
    #[command(group(
        ArgGroup::new("scope")
            .args(["students", "stream"])
            .required(true)
            .multiple(false)
    ))]
    Rate {
        #[arg(long = "student")]
        students: Vec<i64>,
        /// Rate every active student in this stream
        #[arg(long)]
        stream: Option<i64>,
        #[command(flatten)]
        window: WindowArgs,
        #[command(flatten)]
        weights: WeightArgs,
    },
    /// Rate weekly facts read from a CSV file, no database needed
    RateFile {
        #[arg(long)]
        csv: PathBuf,
        #[command(flatten)]
        weights: WeightArgs,
    },
    /// Build the weekly report for a stream
    Report {
        #[arg(long)]
        stream: i64,
        #[command(flatten)]
        window: WindowArgs,
        #[command(flatten)]
        weights: WeightArgs,
        /// Write markdown here instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[derive(Args)]
struct WindowArgs {
    /// First day of the week (defaults to last week's Monday)
    #[arg(long, requires = "week_end")]
    week_start: Option<NaiveDate>,
    /// Last day of the week, inclusive
    #[arg(long, requires = "week_start")]
    week_end: Option<NaiveDate>,
}

impl WindowArgs {
    fn resolve(&self) -> anyhow::Result<WeekWindow> {
        match (self.week_start, self.week_end) {
            (Some(start), Some(end)) => WeekWindow::new(start, end),
            (None, None) => Ok(WeekWindow::previous(Utc::now().date_naive())),
            _ => bail!("--week-start and --week-end must be given together"),
        }
    }
}

#[derive(Args)]
struct PageArgs {
    #[arg(long, default_value_t = 0)]
    skip: i64,
    #[arg(long, default_value_t = 100)]
    limit: i64,
}

#[derive(Subcommand)]
enum StudentCommands {
    List {
        #[arg(long)]
        active: Option<bool>,
        #[arg(long)]
        program: Option<i64>,
        #[command(flatten)]
        page: PageArgs,
    },
    Show {
        student_id: i64,
    },
    FindTelegram {
        telegram_user_id: i64,
    },
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        phone: String,
        #[arg(long)]
        telegram_id: Option<i64>,
        #[arg(long)]
        telegram_username: Option<String>,
        #[arg(long)]
        program: Option<i64>,
        #[arg(long)]
        inactive: bool,
    },
    Update {
        student_id: i64,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        phone: Option<String>,
        #[arg(long)]
        telegram_id: Option<i64>,
        #[arg(long)]
        telegram_username: Option<String>,
        #[arg(long)]
        active: Option<bool>,
        #[arg(long)]
        program: Option<i64>,
    },
    /// Mark a student inactive
    Deactivate {
        student_id: i64,
    },
    /// Activity summary over recent days
    Stats {
        student_id: i64,
        #[arg(long, default_value_t = 30)]
        days: i64,
    },
}

#[derive(Subcommand)]
enum StreamCommands {
    /// Streams that have not ended, with notification settings
    List,
    Students {
        stream_id: i64,
    },
}

#[derive(Subcommand)]
enum MaterialCommands {
    List {
        #[arg(long)]
        lesson: Option<i64>,
        #[arg(long, value_enum)]
        category: Option<MaterialCategory>,
        #[arg(long)]
        public: Option<bool>,
        #[command(flatten)]
        page: PageArgs,
    },
    Show {
        material_id: i64,
    },
    Add {
        #[arg(long)]
        lesson: i64,
        #[arg(long)]
        title: String,
        #[arg(long, value_enum)]
        category: MaterialCategory,
        #[arg(long)]
        content: Option<String>,
        #[arg(long)]
        file_path: Option<String>,
        #[arg(long)]
        material_type: Option<String>,
        #[arg(long)]
        public: bool,
    },
    Update {
        material_id: i64,
        #[arg(long)]
        title: Option<String>,
        #[arg(long, value_enum)]
        category: Option<MaterialCategory>,
        #[arg(long)]
        content: Option<String>,
        #[arg(long)]
        file_path: Option<String>,
        #[arg(long)]
        material_type: Option<String>,
        #[arg(long)]
        public: Option<bool>,
    },
    Delete {
        material_id: i64,
    },
    /// A lesson's materials grouped by category
    Lesson {
        lesson_id: i64,
    },
    Search {
        term: String,
        #[command(flatten)]
        page: PageArgs,
    },
    Stats,
}

#[derive(Subcommand)]
enum MessageCommands {
    List {
        #[arg(long)]
        chat: Option<i64>,
        #[arg(long, value_enum)]
        sender_type: Option<SenderType>,
        #[arg(long)]
        sender: Option<i64>,
        #[command(flatten)]
        page: PageArgs,
    },
    Show {
        message_id: i64,
    },
    Add {
        #[arg(long)]
        chat: i64,
        #[arg(long, value_enum, default_value = "user")]
        sender_type: SenderType,
        #[arg(long)]
        sender: Option<i64>,
        #[arg(long)]
        text: Option<String>,
        #[arg(long)]
        attachment: Option<String>,
        #[arg(long)]
        telegram_message_id: Option<i64>,
    },
    /// Record the bot's answer to a message
    Reply {
        message_id: i64,
        #[arg(long)]
        text: Option<String>,
        #[arg(long)]
        attachment: Option<String>,
    },
    ChatStats {
        chat_id: i64,
    },
    Stats,
    Search {
        term: String,
        #[command(flatten)]
        page: PageArgs,
    },
}

#[derive(Serialize)]
struct BatchOutput<'a> {
    ratings: Vec<&'a WeeklyRating>,
    failures: Vec<RatingFailure>,
    unreadable_rows: &'a [UnreadableRow],
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn describe_student(student: &Student) -> String {
    format!(
        "#{} {} ({}){}",
        student.student_id,
        student.name,
        student.phone,
        if student.is_active { "" } else { " [inactive]" }
    )
}

fn print_batch(
    batch: &RatingBatch,
    unreadable_rows: &[UnreadableRow],
    json: bool,
) -> anyhow::Result<()> {
    let ratings: Vec<&WeeklyRating> = batch
        .iter()
        .filter_map(|(_, outcome)| outcome.as_ref().ok())
        .collect();
    let failures: Vec<RatingFailure> = batch
        .iter()
        .filter_map(|(student_id, outcome)| {
            outcome.as_ref().err().map(|err| RatingFailure {
                student_id: *student_id,
                error: format!("{err:#}"),
            })
        })
        .collect();

    if json {
        return print_json(&BatchOutput {
            ratings,
            failures,
            unreadable_rows,
        });
    }

    if ratings.is_empty() && failures.is_empty() && unreadable_rows.is_empty() {
        println!("No students to rate.");
        return Ok(());
    }

    for rating in &ratings {
        println!(
            "- Student #{} score {:.2} ({}) assignments {:.2}, activity {:.2}, attendance {:.2}, engagement {:.2}",
            rating.student_id,
            rating.weekly_score,
            rating.category,
            rating.scores.assignment_score,
            rating.scores.activity_score,
            rating.scores.attendance_score,
            rating.scores.engagement_score
        );
    }
    for failure in &failures {
        println!("- Student #{} not rated: {}", failure.student_id, failure.error);
    }
    for row in unreadable_rows {
        println!("- Line {} not read: {}", row.line, row.error);
    }

    let owned: Vec<WeeklyRating> = ratings.into_iter().cloned().collect();
    let mix: Vec<String> = report::category_mix(&owned)
        .into_iter()
        .map(|(category, count)| format!("{category} {count}"))
        .collect();
    println!("Category mix: {}", mix.join(", "));

    Ok(())
}

/// Rates every row of a facts file. Rows that fail to parse are returned
/// separately, keyed by line number.
fn rate_file(
    csv_path: &std::path::Path,
    config: &rating::RatingConfig,
) -> anyhow::Result<(RatingBatch, Vec<UnreadableRow>)> {
    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let mut batch = Vec::new();
    let mut unreadable = Vec::new();

    for (index, result) in reader.deserialize::<FactsRow>().enumerate() {
        // Header is line 1.
        let line = index + 2;
        match result {
            Ok(row) => {
                let student_id = row.student_id;
                let outcome = WeeklyFacts::try_from(row)
                    .map(|facts| rating::compute_rating(&facts, config));
                if let Err(err) = &outcome {
                    warn!(line, student_id, error = %err, "facts row rejected");
                }
                batch.push((student_id, outcome));
            }
            Err(err) => {
                warn!(line, error = %err, "skipping unreadable facts row");
                unreadable.push(UnreadableRow {
                    line,
                    error: err.to_string(),
                });
            }
        }
    }

    Ok((batch, unreadable))
}

/// Stream size plus the ids of its active students.
async fn active_student_ids(pool: &PgPool, stream_id: i64) -> anyhow::Result<(usize, Vec<i64>)> {
    let listing = db::stream_students(pool, stream_id).await?;
    let active = listing
        .students
        .iter()
        .filter(|student| student.is_active)
        .map(|student| student.student_id)
        .collect();
    Ok((listing.total_count, active))
}

async fn run_students(pool: &PgPool, command: StudentCommands, json: bool) -> anyhow::Result<()> {
    match command {
        StudentCommands::List {
            active,
            program,
            page,
        } => {
            let (students, total) =
                db::list_students(pool, active, program, page.skip, page.limit).await?;
            if json {
                #[derive(Serialize)]
                struct Listing {
                    students: Vec<Student>,
                    total: i64,
                    page: i64,
                    size: i64,
                }
                let limit = page.limit.clamp(1, 1000);
                return print_json(&Listing {
                    students,
                    total,
                    page: page.skip.max(0) / limit + 1,
                    size: limit,
                });
            }
            println!("{} of {total} students:", students.len());
            for student in &students {
                println!("- {}", describe_student(student));
            }
        }
        StudentCommands::Show { student_id } => {
            let student = db::get_student(pool, student_id)
                .await?
                .with_context(|| format!("student {student_id} not found"))?;
            if json {
                return print_json(&student);
            }
            println!("{}", describe_student(&student));
        }
        StudentCommands::FindTelegram { telegram_user_id } => {
            let student = db::get_student_by_telegram(pool, telegram_user_id)
                .await?
                .with_context(|| format!("no student with telegram id {telegram_user_id}"))?;
            if json {
                return print_json(&student);
            }
            println!("{}", describe_student(&student));
        }
        StudentCommands::Add {
            name,
            phone,
            telegram_id,
            telegram_username,
            program,
            inactive,
        } => {
            let student = db::create_student(
                pool,
                &NewStudent {
                    name,
                    phone,
                    telegram_user_id: telegram_id,
                    telegram_username,
                    is_active: !inactive,
                    course_program_id: program,
                },
            )
            .await?;
            if json {
                return print_json(&student);
            }
            println!("Created {}.", describe_student(&student));
        }
        StudentCommands::Update {
            student_id,
            name,
            phone,
            telegram_id,
            telegram_username,
            active,
            program,
        } => {
            let update = StudentUpdate {
                name,
                phone,
                telegram_user_id: telegram_id,
                telegram_username,
                is_active: active,
                course_program_id: program,
            };
            let student = db::update_student(pool, student_id, &update)
                .await?
                .with_context(|| format!("student {student_id} not found"))?;
            if json {
                return print_json(&student);
            }
            println!("Updated {}.", describe_student(&student));
        }
        StudentCommands::Deactivate { student_id } => {
            if !db::deactivate_student(pool, student_id).await? {
                bail!("student {student_id} not found");
            }
            println!("Student #{student_id} deactivated.");
        }
        StudentCommands::Stats { student_id, days } => {
            db::get_student(pool, student_id)
                .await?
                .with_context(|| format!("student {student_id} not found"))?;
            let window = WeekWindow::trailing(Utc::now().date_naive(), days);
            let facts = db::fetch_weekly_facts(pool, student_id, window).await?;
            let stats = StudentStats::from(&facts);
            if json {
                return print_json(&stats);
            }
            println!("Student #{student_id}, {window}:");
            println!(
                "- Assignments: {}/{} completed",
                stats.completed_assignments, stats.total_assignments
            );
            match stats.average_grade {
                Some(grade) => println!("- Average grade: {grade:.1}"),
                None => println!("- Average grade: none"),
            }
            println!("- Messages: {}", stats.messages_count);
            println!("- Attendance: {:.1}%", stats.attendance_rate * 100.0);
            println!("- Study hours (estimate): {:.1}", stats.study_hours);
        }
    }

    Ok(())
}

async fn run_streams(pool: &PgPool, command: StreamCommands, json: bool) -> anyhow::Result<()> {
    match command {
        StreamCommands::List => {
            let streams = db::list_active_streams(pool, Utc::now().date_naive()).await?;
            if json {
                return print_json(&streams);
            }
            if streams.is_empty() {
                println!("No running streams.");
            }
            for stream in &streams {
                let settings = &stream.notification_settings;
                println!(
                    "- #{} {} ({} to {}), notifications {} {}",
                    stream.stream_id,
                    stream.name,
                    stream.start_date,
                    stream.end_date,
                    if settings.enabled { "on" } else { "off" },
                    settings.frequency
                );
            }
        }
        StreamCommands::Students { stream_id } => {
            let listing = db::stream_students(pool, stream_id).await?;
            if json {
                return print_json(&listing);
            }
            println!(
                "Stream #{stream_id}: {} students, {} active",
                listing.total_count, listing.active_count
            );
            for student in &listing.students {
                println!("- {}", describe_student(student));
            }
        }
    }

    Ok(())
}

fn print_materials(materials: &[models::CourseMaterial]) {
    if materials.is_empty() {
        println!("No materials found.");
    }
    for material in materials {
        println!(
            "- #{} [{}] {} (lesson {}){}",
            material.material_id,
            material.material_category,
            material.title,
            material.lesson_id,
            if material.is_public { " public" } else { "" }
        );
    }
}

async fn run_materials(pool: &PgPool, command: MaterialCommands, json: bool) -> anyhow::Result<()> {
    match command {
        MaterialCommands::List {
            lesson,
            category,
            public,
            page,
        } => {
            let found =
                materials::list_materials(pool, lesson, category, public, page.skip, page.limit)
                    .await?;
            if json {
                return print_json(&found);
            }
            print_materials(&found);
        }
        MaterialCommands::Show { material_id } => {
            let material = materials::get_material(pool, material_id)
                .await?
                .with_context(|| format!("material {material_id} not found"))?;
            if json {
                return print_json(&material);
            }
            print_materials(std::slice::from_ref(&material));
            if let Some(content) = &material.content {
                println!();
                println!("{content}");
            }
        }
        MaterialCommands::Add {
            lesson,
            title,
            category,
            content,
            file_path,
            material_type,
            public,
        } => {
            let material = materials::create_material(
                pool,
                &NewMaterial {
                    lesson_id: lesson,
                    title,
                    content,
                    file_path,
                    material_type,
                    material_category: category,
                    is_public: public,
                },
            )
            .await?;
            if json {
                return print_json(&material);
            }
            println!("Created material #{}.", material.material_id);
        }
        MaterialCommands::Update {
            material_id,
            title,
            category,
            content,
            file_path,
            material_type,
            public,
        } => {
            let update = MaterialUpdate {
                title,
                content,
                file_path,
                material_type,
                material_category: category,
                is_public: public,
            };
            let material = materials::update_material(pool, material_id, &update)
                .await?
                .with_context(|| format!("material {material_id} not found"))?;
            if json {
                return print_json(&material);
            }
            println!("Updated material #{}.", material.material_id);
        }
        MaterialCommands::Delete { material_id } => {
            if !materials::delete_material(pool, material_id).await? {
                bail!("material {material_id} not found");
            }
            println!("Material #{material_id} deleted.");
        }
        MaterialCommands::Lesson { lesson_id } => {
            let grouped = materials::materials_by_lesson(pool, lesson_id).await?;
            if json {
                return print_json(&grouped);
            }
            for (label, items) in [
                ("Lectures", &grouped.lecture),
                ("Assignments", &grouped.assignment),
                ("Methodical", &grouped.methodical),
            ] {
                println!("{label}:");
                print_materials(items);
            }
        }
        MaterialCommands::Search { term, page } => {
            let found = materials::search_materials(pool, &term, page.skip, page.limit).await?;
            if json {
                return print_json(&found);
            }
            print_materials(&found);
        }
        MaterialCommands::Stats => {
            let stats = materials::material_stats(pool).await?;
            if json {
                return print_json(&stats);
            }
            println!(
                "{} materials ({} public, {} private)",
                stats.total, stats.public, stats.private
            );
            for (category, count) in &stats.by_category {
                println!("- {category}: {count}");
            }
        }
    }

    Ok(())
}

fn print_messages(found: &[models::MessageWithResponses]) {
    if found.is_empty() {
        println!("No messages found.");
    }
    for entry in found {
        let message = &entry.message;
        println!(
            "- #{} chat {} {} at {}: {}",
            message.message_id,
            message.chat_id,
            message.sender_type.as_str(),
            message.created_at.format("%Y-%m-%d %H:%M"),
            message.text_content.as_deref().unwrap_or("(no text)")
        );
        for response in &entry.bot_responses {
            println!(
                "  - bot: {}",
                response.text_content.as_deref().unwrap_or("(no text)")
            );
        }
    }
}

async fn run_messages(pool: &PgPool, command: MessageCommands, json: bool) -> anyhow::Result<()> {
    match command {
        MessageCommands::List {
            chat,
            sender_type,
            sender,
            page,
        } => {
            let found =
                messages::list_messages(pool, chat, sender_type, sender, page.skip, page.limit)
                    .await?;
            if json {
                return print_json(&found);
            }
            print_messages(&found);
        }
        MessageCommands::Show { message_id } => {
            let found = messages::get_message(pool, message_id)
                .await?
                .with_context(|| format!("message {message_id} not found"))?;
            if json {
                return print_json(&found);
            }
            print_messages(std::slice::from_ref(&found));
        }
        MessageCommands::Add {
            chat,
            sender_type,
            sender,
            text,
            attachment,
            telegram_message_id,
        } => {
            let message = messages::create_message(
                pool,
                &NewMessage {
                    telegram_message_id,
                    chat_id: chat,
                    sender_type,
                    sender_id: sender,
                    text_content: text,
                    attachment_url: attachment,
                },
            )
            .await?;
            if json {
                return print_json(&message);
            }
            println!("Stored message #{}.", message.message_id);
        }
        MessageCommands::Reply {
            message_id,
            text,
            attachment,
        } => {
            let response = messages::create_bot_response(
                pool,
                message_id,
                text.as_deref(),
                attachment.as_deref(),
            )
            .await?;
            if json {
                return print_json(&response);
            }
            println!("Stored response #{} to message #{message_id}.", response.response_id);
        }
        MessageCommands::ChatStats { chat_id } => {
            let stats = messages::chat_stats(pool, chat_id).await?;
            if json {
                return print_json(&stats);
            }
            println!(
                "Chat {chat_id}: {} messages ({} user, {} bot), {} active users",
                stats.total_messages, stats.user_messages, stats.bot_messages, stats.active_users
            );
            if let Some(last) = stats.last_activity {
                println!("Last activity {}", last.format("%Y-%m-%d %H:%M"));
            }
        }
        MessageCommands::Stats => {
            let stats = messages::message_stats(pool).await?;
            if json {
                return print_json(&stats);
            }
            println!(
                "{} messages across {} chats, {} bot responses",
                stats.total_messages, stats.total_chats, stats.total_responses
            );
            for (sender_type, count) in &stats.by_sender_type {
                println!("- {}: {count}", sender_type.as_str());
            }
        }
        MessageCommands::Search { term, page } => {
            let found = messages::search_messages(pool, &term, page.skip, page.limit).await?;
            if json {
                return print_json(&found);
            }
            print_messages(&found);
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    logging::init_tracing(cli.verbose, cli.log_json)?;

    match cli.command {
        Commands::RateFile { csv, weights } => {
            let config = weights.rating_config()?;
            let (batch, unreadable) = rate_file(&csv, &config)?;
            print_batch(&batch, &unreadable, cli.json)?;
        }
        Commands::InitDb => {
            let pool = cli.database.connect().await?;
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            let pool = cli.database.connect().await?;
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::Students { command } => {
            let pool = cli.database.connect().await?;
            run_students(&pool, command, cli.json).await?
        }
        Commands::Streams { command } => {
            let pool = cli.database.connect().await?;
            run_streams(&pool, command, cli.json).await?
        }
        Commands::Materials { command } => {
            let pool = cli.database.connect().await?;
            run_materials(&pool, command, cli.json).await?
        }
        Commands::Messages { command } => {
            let pool = cli.database.connect().await?;
            run_messages(&pool, command, cli.json).await?
        }
        Commands::Facts { student, window } => {
            let week = window.resolve()?;
            let pool = cli.database.connect().await?;
            db::get_student(&pool, student)
                .await?
                .with_context(|| format!("student {student} not found"))?;
            let facts = db::fetch_weekly_facts(&pool, student, week).await?;
            if cli.json {
                return print_json(&facts);
            }
            println!("Student #{student}, {week}:");
            println!(
                "- Assignments: {} total, {} completed, {} on time, {} late, average grade {:.1}",
                facts.assignments.total,
                facts.assignments.completed,
                facts.assignments.on_time,
                facts.assignments.late,
                facts.assignments.average_grade
            );
            println!(
                "- Activity: {} messages, {} questions",
                facts.activity.messages_sent, facts.activity.questions_asked
            );
            println!(
                "- Attendance: {}/{} classes",
                facts.attendance.attended, facts.attendance.scheduled_classes
            );
            println!(
                "- Engagement: {:.1} study hours, {} materials, participation {:.1}",
                facts.engagement.study_hours,
                facts.engagement.materials_viewed,
                facts.engagement.participation_score
            );
        }
        Commands::Rate {
            students,
            stream,
            window,
            weights,
        } => {
            let config = weights.rating_config()?;
            let week = window.resolve()?;
            let store = db::PgStore::new(cli.database.connect().await?);
            let students = match stream {
                Some(stream_id) => active_student_ids(store.pool(), stream_id).await?.1,
                None => students,
            };
            let batch = report::rate_students(&store, &students, week, &config).await;

            if !cli.json && students.len() == 1 {
                if let Some((_, Ok(rating))) = batch.first() {
                    println!("{}", rating.personal_message);
                    println!();
                }
            }
            print_batch(&batch, &[], cli.json)?;
        }
        Commands::Report {
            stream,
            window,
            weights,
            out,
        } => {
            let config = weights.rating_config()?;
            let week = window.resolve()?;
            let store = db::PgStore::new(cli.database.connect().await?);
            let (total_students, active) = active_student_ids(store.pool(), stream).await?;

            let batch = report::rate_students(&store, &active, week, &config).await;
            let weekly = report::build_weekly_report(stream, week, total_students, batch);

            if cli.json {
                return print_json(&weekly);
            }

            let markdown = report::render_markdown(&weekly);
            match out {
                Some(path) => {
                    std::fs::write(&path, markdown)
                        .with_context(|| format!("failed to write {}", path.display()))?;
                    println!("Report written to {}.", path.display());
                }
                None => print!("{markdown}"),
            }
        }
    }

    Ok(())
}
