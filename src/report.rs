use std::fmt::Write;

use anyhow::anyhow;
use tracing::{info, warn};

use crate::models::{
    AttentionStudent, RankedStudent, RatingFailure, WeekWindow, WeeklyRating, WeeklyReport,
};
use crate::rating::{self, Category, RatingConfig};
use crate::store::TutorStore;

/// Per-student outcome of rating a group; every requested id appears once.
pub type RatingBatch = Vec<(i64, anyhow::Result<WeeklyRating>)>;

const TOP_PERFORMERS: usize = 3;
const ATTENTION_THRESHOLD: f64 = 50.0;
const ATTENTION_RECOMMENDATIONS: usize = 2;

pub async fn rate_student<S: TutorStore>(
    store: &S,
    student_id: i64,
    week: WeekWindow,
    config: &RatingConfig,
) -> anyhow::Result<WeeklyRating> {
    store
        .find_student(student_id)
        .await?
        .ok_or_else(|| anyhow!("student {student_id} not found"))?;

    let facts = store.weekly_facts(student_id, week).await?;
    Ok(rating::compute_rating(&facts, config))
}

pub async fn rate_students<S: TutorStore>(
    store: &S,
    student_ids: &[i64],
    week: WeekWindow,
    config: &RatingConfig,
) -> RatingBatch {
    let mut batch = Vec::with_capacity(student_ids.len());

    for &student_id in student_ids {
        let outcome = rate_student(store, student_id, week, config).await;
        if let Err(err) = &outcome {
            warn!(student_id, error = %err, "rating failed, continuing with the rest");
        }
        batch.push((student_id, outcome));
    }

    batch
}

pub fn build_weekly_report(
    stream_id: i64,
    week: WeekWindow,
    total_students: usize,
    batch: RatingBatch,
) -> WeeklyReport {
    let mut ratings = Vec::new();
    let mut failures = Vec::new();

    for (student_id, outcome) in batch {
        match outcome {
            Ok(rating) => ratings.push(rating),
            Err(err) => failures.push(RatingFailure {
                student_id,
                error: format!("{err:#}"),
            }),
        }
    }

    ratings.sort_by(|a, b| {
        b.weekly_score
            .partial_cmp(&a.weekly_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let average_rating = if ratings.is_empty() {
        0.0
    } else {
        let sum: f64 = ratings.iter().map(|rating| rating.weekly_score).sum();
        (sum / ratings.len() as f64 * 100.0).round() / 100.0
    };

    let top_performers = ratings
        .iter()
        .take(TOP_PERFORMERS)
        .map(|rating| RankedStudent {
            student_id: rating.student_id,
            weekly_score: rating.weekly_score,
            category: rating.category,
        })
        .collect();

    let needs_attention = ratings
        .iter()
        .filter(|rating| rating.weekly_score < ATTENTION_THRESHOLD)
        .map(|rating| AttentionStudent {
            student_id: rating.student_id,
            weekly_score: rating.weekly_score,
            category: rating.category,
            recommendations: rating
                .recommendations
                .iter()
                .take(ATTENTION_RECOMMENDATIONS)
                .cloned()
                .collect(),
        })
        .collect();

    info!(
        stream_id,
        rated = ratings.len(),
        failed = failures.len(),
        "weekly report built"
    );

    WeeklyReport {
        stream_id,
        week_start: week.start,
        week_end: week.end,
        total_students,
        rated_students: ratings.len(),
        average_rating,
        top_performers,
        needs_attention,
        failures,
    }
}

pub fn category_mix(ratings: &[WeeklyRating]) -> Vec<(Category, usize)> {
    [Category::High, Category::Medium, Category::Low, Category::Critical]
        .into_iter()
        .map(|category| {
            let count = ratings.iter().filter(|rating| rating.category == category).count();
            (category, count)
        })
        .collect()
}

pub fn render_markdown(report: &WeeklyReport) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Weekly Rating Report");
    let _ = writeln!(
        output,
        "Stream {} for {} to {}",
        report.stream_id, report.week_start, report.week_end
    );
    let _ = writeln!(output);
    let _ = writeln!(
        output,
        "- Students in stream: {}",
        report.total_students
    );
    let _ = writeln!(output, "- Rated: {}", report.rated_students);
    let _ = writeln!(output, "- Average rating: {:.2}", report.average_rating);
    let _ = writeln!(output);
    let _ = writeln!(output, "## Top Performers");

    if report.top_performers.is_empty() {
        let _ = writeln!(output, "No ratings computed for this week.");
    } else {
        for student in &report.top_performers {
            let _ = writeln!(
                output,
                "- Student #{} score {:.2} ({})",
                student.student_id, student.weekly_score, student.category
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Needs Attention");

    if report.needs_attention.is_empty() {
        let _ = writeln!(output, "Nobody scored below {ATTENTION_THRESHOLD:.0} this week.");
    } else {
        for student in &report.needs_attention {
            let _ = writeln!(
                output,
                "- Student #{} score {:.2} ({})",
                student.student_id, student.weekly_score, student.category
            );
            for line in &student.recommendations {
                let _ = writeln!(output, "  - {line}");
            }
        }
    }

    if !report.failures.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "## Not Rated");
        for failure in &report.failures {
            let _ = writeln!(output, "- Student #{}: {}", failure.student_id, failure.error);
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use anyhow::bail;
    use chrono::{NaiveDate, Utc};

    use super::*;
    use crate::models::{AttendanceFacts, Student, WeeklyFacts};
    use crate::rating::SubScores;

    fn week() -> WeekWindow {
        WeekWindow::new(
            NaiveDate::from_ymd_opt(2026, 2, 2).unwrap(),
            NaiveDate::from_ymd_opt(2026, 2, 8).unwrap(),
        )
        .unwrap()
    }

    fn student(student_id: i64) -> Student {
        Student {
            student_id,
            name: format!("Student {student_id}"),
            phone: format!("+1555000{student_id:04}"),
            telegram_user_id: None,
            telegram_username: None,
            is_active: true,
            course_program_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            last_login_at: None,
        }
    }

    fn rating(student_id: i64, score: f64) -> WeeklyRating {
        let scores = SubScores {
            assignment_score: score,
            activity_score: score,
            attendance_score: score,
            engagement_score: score,
        };
        WeeklyRating {
            student_id,
            week_start: week().start,
            week_end: week().end,
            weekly_score: score,
            scores,
            category: Category::for_score(score),
            recommendations: rating::recommendations(&scores, score),
            personal_message: String::new(),
        }
    }

    #[derive(Default)]
    struct MemoryStore {
        students: HashMap<i64, Student>,
        facts: HashMap<i64, WeeklyFacts>,
        broken: Vec<i64>,
    }

    impl MemoryStore {
        fn with(mut self, facts: WeeklyFacts) -> Self {
            self.students.insert(facts.student_id, student(facts.student_id));
            self.facts.insert(facts.student_id, facts);
            self
        }
    }

    impl TutorStore for MemoryStore {
        async fn find_student(&self, student_id: i64) -> anyhow::Result<Option<Student>> {
            Ok(self.students.get(&student_id).cloned())
        }

        async fn weekly_facts(
            &self,
            student_id: i64,
            week: WeekWindow,
        ) -> anyhow::Result<WeeklyFacts> {
            if self.broken.contains(&student_id) {
                bail!("facts unavailable for student {student_id}");
            }
            Ok(self
                .facts
                .get(&student_id)
                .cloned()
                .unwrap_or_else(|| WeeklyFacts::empty(student_id, week)))
        }
    }

    #[test]
    fn report_ranks_and_flags_students() {
        let batch: RatingBatch = vec![
            (1, Ok(rating(1, 72.5))),
            (2, Ok(rating(2, 95.0))),
            (3, Ok(rating(3, 40.0))),
            (4, Ok(rating(4, 81.0))),
            (5, Err(anyhow!("database went away"))),
        ];

        let report = build_weekly_report(11, week(), 6, batch);

        assert_eq!(report.total_students, 6);
        assert_eq!(report.rated_students, 4);
        let top: Vec<i64> = report.top_performers.iter().map(|s| s.student_id).collect();
        assert_eq!(top, vec![2, 4, 1]);
        assert_eq!(report.needs_attention.len(), 1);
        assert_eq!(report.needs_attention[0].student_id, 3);
        assert_eq!(report.needs_attention[0].recommendations.len(), 2);
        assert!((report.average_rating - 72.13).abs() < 1e-9);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].student_id, 5);
        assert!(report.failures[0].error.contains("database went away"));
    }

    #[test]
    fn empty_batch_gives_zero_average() {
        let report = build_weekly_report(3, week(), 0, Vec::new());
        assert_eq!(report.average_rating, 0.0);
        assert!(report.top_performers.is_empty());
        assert!(report.needs_attention.is_empty());
    }

    #[test]
    fn markdown_lists_sections() {
        let batch: RatingBatch = vec![(1, Ok(rating(1, 30.0))), (2, Err(anyhow!("boom")))];
        let report = build_weekly_report(7, week(), 2, batch);
        let markdown = render_markdown(&report);

        assert!(markdown.starts_with("# Weekly Rating Report"));
        assert!(markdown.contains("Stream 7 for 2026-02-02 to 2026-02-08"));
        assert!(markdown.contains("## Needs Attention"));
        assert!(markdown.contains("- Student #1 score 30.00 (critical)"));
        assert!(markdown.contains("## Not Rated"));
        assert!(markdown.contains("- Student #2: boom"));
    }

    #[test]
    fn category_mix_counts_each_bucket() {
        let ratings = vec![rating(1, 95.0), rating(2, 91.0), rating(3, 10.0)];
        let mix = category_mix(&ratings);
        assert_eq!(
            mix,
            vec![
                (Category::High, 2),
                (Category::Medium, 0),
                (Category::Low, 0),
                (Category::Critical, 1),
            ]
        );
    }

    #[tokio::test]
    async fn batch_keeps_going_past_failures() {
        let mut facts = WeeklyFacts::empty(1, week());
        facts.attendance = AttendanceFacts {
            scheduled_classes: 2,
            attended: 2,
        };
        let mut store = MemoryStore::default().with(facts);
        store.students.insert(3, student(3));
        store.broken.push(3);

        let batch = rate_students(&store, &[1, 2, 3], week(), &RatingConfig::default()).await;

        assert_eq!(batch.len(), 3);
        assert_eq!(batch[0].0, 1);
        let first = batch[0].1.as_ref().unwrap();
        assert_eq!(first.scores.attendance_score, 100.0);
        assert!(batch[1].1.as_ref().unwrap_err().to_string().contains("not found"));
        assert!(batch[2].1.is_err());
    }

    #[tokio::test]
    async fn rating_respects_custom_weights() {
        let store = MemoryStore::default().with(WeeklyFacts::empty(8, week()));
        let attendance_only = RatingConfig::new(0.0, 0.0, 1.0, 0.0).unwrap();

        let rating = rate_student(&store, 8, week(), &attendance_only).await.unwrap();
        assert_eq!(rating.weekly_score, 100.0);
        assert_eq!(rating.category, Category::High);
    }
}
