use chrono::Duration;
use course_core::model::{
    Answer, AttemptStatus, Chapter, ChapterId, CompletionFact, Course, CourseId, MaxAttempts,
    PaymentMethod, Question, QuestionId, QuestionOption, Quiz, QuizId, QuizPassFact, StudentId,
    Subchapter, SubchapterId, Subscription, SubscriptionType, Topic, TopicId,
};
use course_core::grading::{UngradedShortAnswers, grade_submission};
use course_core::time::fixed_now;
use storage::repository::{
    AttemptAllocation, AttemptRepository, CatalogRepository, EnrollmentRepository,
    ProgressRepository, StorageError,
};
use storage::sqlite::SqliteRepository;

async fn connect(name: &str) -> SqliteRepository {
    let repo = SqliteRepository::connect(&format!("sqlite:file:{name}?mode=memory&cache=shared"))
        .await
        .expect("connect");
    repo.migrate().await.expect("migrate");
    repo
}

fn build_quiz(id: u64, course: CourseId) -> Quiz {
    let q1 = Question::multiple_choice(
        QuestionId::new(1),
        "Pick two",
        vec![
            QuestionOption::new("one", false),
            QuestionOption::new("two", true),
        ],
        5,
    )
    .unwrap();
    let q2 = Question::true_false(QuestionId::new(2), "Rust has a GC", false, 5).unwrap();
    Quiz::new(QuizId::new(id), course, "Basics", vec![q1, q2]).unwrap()
}

fn build_course(id: u64, topics: &[u64]) -> Course {
    let topics = topics
        .iter()
        .enumerate()
        .map(|(i, t)| {
            Topic::new(
                TopicId::new(*t),
                format!("Topic {t}"),
                u32::try_from(i).unwrap(),
                10,
            )
            .unwrap()
        })
        .collect();
    let sub = Subchapter::new(SubchapterId::new(1), "Sub", 1, topics)
        .unwrap()
        .with_quiz(build_quiz(id * 10, CourseId::new(id)));
    let chapter = Chapter::new(ChapterId::new(1), "Chapter", 1, vec![sub]).unwrap();
    Course::new(CourseId::new(id), "Course", vec![chapter]).unwrap()
}

#[tokio::test]
async fn sqlite_catalog_roundtrips_course_and_quizzes() {
    let repo = connect("memdb_catalog").await;
    let course = build_course(1, &[11, 12]);
    repo.upsert_course(&course).await.unwrap();

    let mut standalone = build_quiz(2, CourseId::new(1));
    standalone.publish(fixed_now());
    repo.upsert_quiz(&standalone).await.unwrap();

    let fetched = repo.get_course(CourseId::new(1)).await.unwrap();
    assert_eq!(fetched, course);
    assert_eq!(
        repo.course_for_topic(TopicId::new(12)).await.unwrap(),
        CourseId::new(1)
    );

    let quizzes = repo.quizzes_for_course(CourseId::new(1)).await.unwrap();
    let ids: Vec<_> = quizzes.iter().map(Quiz::id).collect();
    assert_eq!(ids, vec![QuizId::new(2), QuizId::new(10)]);
    assert!(quizzes.iter().all(Quiz::is_published));

    let err = repo.upsert_course(&build_course(2, &[12])).await.unwrap_err();
    assert!(matches!(err, StorageError::Conflict));
    assert!(matches!(
        repo.get_course(CourseId::new(2)).await.unwrap_err(),
        StorageError::NotFound
    ));
}

#[tokio::test]
async fn sqlite_enrollment_and_subscription() {
    let repo = connect("memdb_enrollment").await;
    let student = StudentId::random();
    let course = CourseId::new(1);

    let (first, created) = repo
        .ensure_enrollment(student, course, fixed_now())
        .await
        .unwrap();
    assert!(created);
    let (second, created) = repo
        .ensure_enrollment(student, course, fixed_now() + Duration::days(1))
        .await
        .unwrap();
    assert!(!created);
    assert_eq!(first, second);
    assert_eq!(repo.list_enrollments(student).await.unwrap().len(), 1);

    let later = fixed_now() + Duration::hours(3);
    repo.touch_enrollment(student, course, later).await.unwrap();
    repo.touch_enrollment(student, course, fixed_now())
        .await
        .unwrap();
    let stored = repo.get_enrollment(student, course).await.unwrap().unwrap();
    assert_eq!(stored.last_accessed_at, later);

    assert!(matches!(
        repo.touch_enrollment(StudentId::random(), course, later)
            .await
            .unwrap_err(),
        StorageError::NotFound
    ));

    let sub = Subscription {
        student_id: student,
        course_id: course,
        kind: SubscriptionType::Monthly,
        payment_method: PaymentMethod::Upi,
        transaction_id: Some("txn-42".into()),
        activated_at: fixed_now(),
    };
    repo.upsert_subscription(&sub).await.unwrap();
    let upgraded = Subscription {
        kind: SubscriptionType::Lifetime,
        ..sub.clone()
    };
    repo.upsert_subscription(&upgraded).await.unwrap();
    assert_eq!(
        repo.get_subscription(student, course).await.unwrap(),
        Some(upgraded)
    );
}

#[tokio::test]
async fn sqlite_completion_bookmark_and_quiz_pass_facts() {
    let repo = connect("memdb_facts").await;
    let student = StudentId::random();
    let fact = CompletionFact {
        student_id: student,
        course_id: CourseId::new(1),
        topic_id: TopicId::new(11),
        completed_at: fixed_now(),
        time_spent_secs: 120,
    };
    assert!(repo.record_completion(&fact).await.unwrap());
    assert!(!repo.record_completion(&fact).await.unwrap());
    let done = repo
        .completed_topics(student, CourseId::new(1))
        .await
        .unwrap();
    assert_eq!(done.len(), 1);
    assert!(done.contains(&TopicId::new(11)));

    assert!(repo.toggle_bookmark(student, TopicId::new(11)).await.unwrap());
    assert_eq!(repo.bookmarked_topics(student).await.unwrap().len(), 1);
    assert!(!repo.toggle_bookmark(student, TopicId::new(11)).await.unwrap());
    assert!(repo.bookmarked_topics(student).await.unwrap().is_empty());

    let pass = QuizPassFact {
        student_id: student,
        course_id: CourseId::new(1),
        quiz_id: QuizId::new(10),
        passed_at: fixed_now(),
    };
    assert!(repo.record_quiz_pass(&pass).await.unwrap());
    assert!(!repo.record_quiz_pass(&pass).await.unwrap());
    assert!(
        repo.passed_quizzes(student, CourseId::new(1))
            .await
            .unwrap()
            .contains(&QuizId::new(10))
    );
}

#[tokio::test]
async fn sqlite_attempts_are_numbered_capped_and_frozen() {
    let repo = connect("memdb_attempts").await;
    let student = StudentId::random();
    let quiz = build_quiz(10, CourseId::new(1));
    let max = MaxAttempts::limited(2).unwrap();

    let AttemptAllocation::Started(mut first) = repo
        .start_attempt(student, quiz.id(), max, fixed_now())
        .await
        .unwrap()
    else {
        panic!("first attempt should start");
    };
    assert_eq!(first.attempt_number, 1);

    let outcome = grade_submission(
        &quiz,
        &[
            Answer::choice(QuestionId::new(1), 1),
            Answer::choice(QuestionId::new(2), 0),
        ],
        &UngradedShortAnswers,
    );
    first
        .apply_grade(outcome, 45, fixed_now() + Duration::minutes(5))
        .unwrap();
    repo.record_graded(&first).await.unwrap();
    assert!(matches!(
        repo.record_graded(&first).await.unwrap_err(),
        StorageError::Conflict
    ));

    let second = repo
        .start_attempt(student, quiz.id(), max, fixed_now())
        .await
        .unwrap();
    assert!(matches!(second, AttemptAllocation::Started(ref a) if a.attempt_number == 2));

    let third = repo
        .start_attempt(student, quiz.id(), max, fixed_now())
        .await
        .unwrap();
    assert_eq!(third, AttemptAllocation::LimitReached { existing: 2 });

    let attempts = repo.list_attempts(student, quiz.id()).await.unwrap();
    assert_eq!(attempts.len(), 2);
    assert_eq!(attempts[0].status, AttemptStatus::Graded);
    assert_eq!(attempts[0].score, 50);
    assert_eq!(attempts[0].answers.len(), 2);
    assert_eq!(attempts[1].status, AttemptStatus::InProgress);

    let fetched = repo.get_attempt(student, quiz.id(), 1).await.unwrap();
    assert_eq!(fetched, attempts[0]);
    assert!(matches!(
        repo.get_attempt(student, quiz.id(), 9).await.unwrap_err(),
        StorageError::NotFound
    ));
}

#[tokio::test]
async fn sqlite_new_start_abandons_open_attempt() {
    let repo = connect("memdb_abandon").await;
    let student = StudentId::random();
    let quiz = QuizId::new(3);

    repo.start_attempt(student, quiz, MaxAttempts::Unlimited, fixed_now())
        .await
        .unwrap();
    repo.start_attempt(student, quiz, MaxAttempts::Unlimited, fixed_now())
        .await
        .unwrap();

    let open = repo
        .in_progress_attempt(student, quiz)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(open.attempt_number, 2);
    let attempts = repo.list_attempts(student, quiz).await.unwrap();
    assert_eq!(attempts[0].status, AttemptStatus::Abandoned);
}

#[tokio::test]
async fn sqlite_concurrent_starts_get_distinct_numbers() {
    let repo = connect("memdb_concurrent").await;
    let student = StudentId::random();
    let quiz = QuizId::new(4);
    let max = MaxAttempts::limited(3).unwrap();

    let mut handles = Vec::new();
    for _ in 0..6 {
        let repo = repo.clone();
        handles.push(tokio::spawn(async move {
            repo.start_attempt(student, quiz, max, fixed_now()).await
        }));
    }

    let mut numbers = Vec::new();
    for handle in handles {
        match handle.await.unwrap() {
            Ok(AttemptAllocation::Started(a)) => numbers.push(a.attempt_number),
            Ok(AttemptAllocation::LimitReached { .. }) | Err(_) => {}
        }
    }
    numbers.sort_unstable();
    numbers.dedup();
    let stored = repo.list_attempts(student, quiz).await.unwrap();
    assert!(stored.len() <= 3);
    assert_eq!(numbers.len(), stored.len());
}
