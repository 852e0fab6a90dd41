//! Course catalog, paid enrollment and lesson progress.

use axum::{
    extract::{Path, State},
    Json,
};
use axum_extra::extract::WithRejection;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sled::transaction::ConflictableTransactionError;
use sled::Transactional;
use tracing::info;

use crate::auth::{CurrentUser, MaybeUser};
use crate::error::{ApiError, ApiResult, JsonBody};
use crate::money::{Amount, Bps};
use crate::notifications::{notify, NotificationKind};
use crate::state::AppState;
use crate::store::{abort, flatten, new_id, owned_key, owner_prefix, trees, tx_get, tx_put, Store};
use crate::vip;
use crate::wallet::{Balance, TxType, Wallet, WalletTransaction};

#[derive(Debug, Clone, Serialize)]
pub struct Course {
    pub course_id: &'static str,
    pub title: &'static str,
    pub category: &'static str,
    pub lessons: u32,
    pub price: Amount,
    pub description: &'static str,
}

pub static COURSES: [Course; 6] = [
    Course {
        course_id: "finance_basics",
        title: "Personal Finance Basics",
        category: "finance",
        lessons: 8,
        price: Amount::from_major(200),
        description: "Budgeting, saving and avoiding debt traps.",
    },
    Course {
        course_id: "digital_payments",
        title: "Safe Digital Payments",
        category: "finance",
        lessons: 5,
        price: Amount::from_major(100),
        description: "UPI, QR codes and how to spot payment fraud.",
    },
    Course {
        course_id: "spoken_english",
        title: "Spoken English",
        category: "language",
        lessons: 20,
        price: Amount::from_major(500),
        description: "Everyday conversation practice from beginner level.",
    },
    Course {
        course_id: "digital_marketing",
        title: "Digital Marketing Essentials",
        category: "career",
        lessons: 12,
        price: Amount::from_major(800),
        description: "Social media, content and running small campaigns.",
    },
    Course {
        course_id: "health_awareness",
        title: "Cancer Awareness and Care",
        category: "health",
        lessons: 6,
        price: Amount::ZERO,
        description: "Early signs, screening and supporting patients at home.",
    },
    Course {
        course_id: "leadership",
        title: "Community Leadership",
        category: "career",
        lessons: 10,
        price: Amount::from_major(1500),
        description: "Organising volunteers and running charity drives.",
    },
];

pub fn find_course(id: &str) -> Option<&'static Course> {
    COURSES.iter().find(|c| c.course_id == id)
}

pub fn discounted(price: Amount, discount_percent: u32) -> Amount {
    price - price.percent(Bps::percent(discount_percent))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Enrollment {
    pub enrollment_id: String,
    pub user_id: String,
    pub course_id: String,
    pub price_paid: Amount,
    pub discount_percent: u32,
    pub lessons_completed: u32,
    pub completed: bool,
    pub enrolled_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub fn enroll(store: &Store, user_id: &str, course: &Course, discount_percent: u32, now: DateTime<Utc>) -> ApiResult<Enrollment> {
    let price = discounted(course.price, discount_percent);
    let wallets = store.tree(trees::WALLETS)?;
    let enrollments = store.tree(trees::ENROLLMENTS)?;
    let ekey = owned_key(user_id, course.course_id);
    let wkey = user_id.as_bytes();
    (&wallets, &enrollments)
        .transaction(|(wt, et)| {
            if et.get(ekey.as_slice())?.is_some() {
                return abort(ApiError::Conflict("Already enrolled in this course".into()));
            }
            let Some(mut w) = tx_get::<Wallet>(wt, wkey)? else {
                return abort(ApiError::NotFound("Wallet not found"));
            };
            w.debit(Balance::Coins, price).map_err(ConflictableTransactionError::Abort)?;
            w.updated_at = now;
            let e = Enrollment {
                enrollment_id: new_id("enr"),
                user_id: user_id.to_string(),
                course_id: course.course_id.to_string(),
                price_paid: price,
                discount_percent,
                lessons_completed: 0,
                completed: false,
                enrolled_at: now,
                updated_at: now,
            };
            tx_put(wt, wkey, &w)?;
            tx_put(et, &ekey, &e)?;
            Ok(e)
        })
        .map_err(flatten)
}

/// Record progress. Progress never goes backwards.
pub fn set_progress(store: &Store, user_id: &str, course: &Course, lessons: u32, now: DateTime<Utc>) -> ApiResult<Enrollment> {
    if lessons > course.lessons {
        return Err(ApiError::bad_request(format!(
            "Course has only {} lessons",
            course.lessons
        )));
    }
    store.update(
        trees::ENROLLMENTS,
        owned_key(user_id, course.course_id),
        "Not enrolled in this course",
        |e: &mut Enrollment| {
            e.lessons_completed = e.lessons_completed.max(lessons);
            e.completed = e.lessons_completed == course.lessons;
            e.updated_at = now;
            Ok(e.clone())
        },
    )
}

pub fn enrollments(store: &Store, user_id: &str) -> ApiResult<Vec<Enrollment>> {
    store.scan_prefix(trees::ENROLLMENTS, owner_prefix(user_id))
}

#[derive(Debug, Deserialize)]
pub struct EnrollReq {
    pub course_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ProgressReq {
    pub lessons_completed: u32,
}

// --- Routes ---

/// GET /api/education/courses
pub async fn courses(State(state): State<AppState>, MaybeUser(user): MaybeUser) -> ApiResult<Json<Value>> {
    let now = Utc::now();
    let (discount, enrolled) = match &user {
        Some(u) => (
            vip::benefits_for(&state.store, &u.user_id, now)?.education_discount,
            enrollments(&state.store, &u.user_id)?,
        ),
        None => (0, Vec::new()),
    };
    let list: Vec<Value> = COURSES
        .iter()
        .map(|c| {
            json!({
                "course_id": c.course_id,
                "title": c.title,
                "category": c.category,
                "lessons": c.lessons,
                "description": c.description,
                "price": c.price,
                "discounted_price": discounted(c.price, discount),
                "enrolled": enrolled.iter().any(|e| e.course_id == c.course_id),
            })
        })
        .collect();
    Ok(Json(json!({ "courses": list, "vip_discount_percent": discount })))
}

/// POST /api/education/enroll
pub async fn enroll_handler(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    WithRejection(Json(req), _): JsonBody<EnrollReq>,
) -> ApiResult<Json<Value>> {
    state.metrics.hit("education");
    let course = find_course(&req.course_id).ok_or(ApiError::NotFound("Course not found"))?;
    let now = Utc::now();
    let discount = vip::benefits_for(&state.store, &user.user_id, now)?.education_discount;
    let e = enroll(&state.store, &user.user_id, course, discount, now)?;

    if e.price_paid.is_positive() {
        WalletTransaction::new(&user.user_id, TxType::CoursePurchase, -e.price_paid, now)
            .reference(&e.enrollment_id)
            .describe(format!("Enrolled in {}", course.title))
            .save(&state.store)?;
    }
    notify(
        &state.store,
        &user.user_id,
        NotificationKind::Education,
        "Enrollment Confirmed 📚",
        &format!("You are now enrolled in {}.", course.title),
        Some("/education"),
        now,
    )?;
    info!(user_id = %user.user_id, course = course.course_id, paid = %e.price_paid, "course enrollment");
    Ok(Json(json!({ "success": true, "enrollment": e, "course": course })))
}

/// GET /api/education/enrollments
pub async fn my_enrollments(State(state): State<AppState>, CurrentUser(user): CurrentUser) -> ApiResult<Json<Value>> {
    let list: Vec<Value> = enrollments(&state.store, &user.user_id)?
        .into_iter()
        .map(|e| {
            let course = find_course(&e.course_id);
            json!({ "enrollment": e, "course": course })
        })
        .collect();
    Ok(Json(json!({ "enrollments": list })))
}

/// POST /api/education/:course_id/progress
pub async fn progress(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(course_id): Path<String>,
    WithRejection(Json(req), _): JsonBody<ProgressReq>,
) -> ApiResult<Json<Value>> {
    let course = find_course(&course_id).ok_or(ApiError::NotFound("Course not found"))?;
    let now = Utc::now();
    let before = state
        .store
        .get::<Enrollment>(trees::ENROLLMENTS, owned_key(&user.user_id, course.course_id))?
        .is_some_and(|e| e.completed);
    let e = set_progress(&state.store, &user.user_id, course, req.lessons_completed, now)?;
    if e.completed && !before {
        notify(
            &state.store,
            &user.user_id,
            NotificationKind::Education,
            "Course Completed 🎓",
            &format!("Congratulations on finishing {}!", course.title),
            Some("/education"),
            now,
        )?;
    }
    Ok(Json(json!({ "success": true, "enrollment": e })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discount_rounds_in_buyers_favour() {
        assert_eq!(discounted(Amount::from_major(200), 0), Amount::from_major(200));
        assert_eq!(discounted(Amount::from_major(200), 15), Amount::from_major(170));
        assert_eq!(discounted(Amount::from_cents(999), 30), Amount::from_cents(700));
    }

    #[test]
    fn enroll_once_then_track_progress() {
        let store = Store::temporary().unwrap();
        let now = Utc::now();
        store
            .put(trees::WALLETS, "u", &Wallet::new("u", Amount::from_major(300), Amount::ZERO, now))
            .unwrap();
        let course = find_course("finance_basics").unwrap();

        let e = enroll(&store, "u", course, 10, now).unwrap();
        assert_eq!(e.price_paid, Amount::from_major(180));
        let again = enroll(&store, "u", course, 10, now).unwrap_err();
        assert!(matches!(again, ApiError::Conflict(_)));
        let w: Wallet = store.get(trees::WALLETS, "u").unwrap().unwrap();
        assert_eq!(w.coins_balance, Amount::from_major(120));

        assert!(set_progress(&store, "u", course, 9, now).is_err());
        let e = set_progress(&store, "u", course, 5, now).unwrap();
        assert!(!e.completed);
        let e = set_progress(&store, "u", course, 3, now).unwrap();
        assert_eq!(e.lessons_completed, 5);
        let e = set_progress(&store, "u", course, 8, now).unwrap();
        assert!(e.completed);

        let other = find_course("spoken_english").unwrap();
        assert!(matches!(
            set_progress(&store, "u", other, 1, now),
            Err(ApiError::NotFound(_))
        ));
    }

    #[test]
    fn cannot_afford_course() {
        let store = Store::temporary().unwrap();
        let now = Utc::now();
        store
            .put(trees::WALLETS, "u", &Wallet::new("u", Amount::from_major(10), Amount::ZERO, now))
            .unwrap();
        let err = enroll(&store, "u", find_course("leadership").unwrap(), 0, now).unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
        assert!(enrollments(&store, "u").unwrap().is_empty());
    }
}
