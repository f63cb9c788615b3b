//! Aggregations over the tour collection, each a single statement.

use serde::Serialize;
use sqlx::{FromRow, PgPool};

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct DifficultyStats {
    pub difficulty: String,
    pub num_tours: i64,
    pub num_ratings: i64,
    pub avg_rating: f64,
    pub avg_price: f64,
    pub min_price: f64,
    pub max_price: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct MonthlyPlan {
    pub month: i32,
    pub num_tour_starts: i64,
    pub tours: Vec<String>,
}

/// Well-rated tours (average ≥ 4.5) grouped by difficulty, cheapest group
/// first, without the `EASY` group.
pub async fn difficulty_stats(db: &PgPool) -> sqlx::Result<Vec<DifficultyStats>> {
    sqlx::query_as::<_, DifficultyStats>(
        r#"
        SELECT UPPER(difficulty)                          AS difficulty,
               COUNT(*)                                   AS num_tours,
               COALESCE(SUM(ratings_quantity), 0)::BIGINT AS num_ratings,
               AVG(ratings_average)                       AS avg_rating,
               AVG(price)                                 AS avg_price,
               MIN(price)                                 AS min_price,
               MAX(price)                                 AS max_price
        FROM tours
        WHERE secret_tour = FALSE AND ratings_average >= 4.5
        GROUP BY UPPER(difficulty)
        HAVING UPPER(difficulty) <> 'EASY'
        ORDER BY avg_price ASC
        "#,
    )
    .fetch_all(db)
    .await
}

pub fn parse_year(raw: &str) -> AppResult<i32> {
    raw.trim()
        .parse::<i32>()
        .ok()
        .filter(|y| (1..=9999).contains(y))
        .ok_or_else(|| AppError::bad_request(format!("Invalid year: {raw}.")))
}

/// Tour starts per month of `year` (UTC), busiest month first.
pub async fn monthly_plan(db: &PgPool, year: i32) -> sqlx::Result<Vec<MonthlyPlan>> {
    sqlx::query_as::<_, MonthlyPlan>(
        r#"
        SELECT EXTRACT(MONTH FROM d.start_date AT TIME ZONE 'UTC')::INT AS month,
               COUNT(*)                                                AS num_tour_starts,
               array_agg(t.name ORDER BY d.start_date, t.name)         AS tours
        FROM tours t
        CROSS JOIN LATERAL unnest(t.start_dates) AS d(start_date)
        WHERE t.secret_tour = FALSE
          AND d.start_date >= make_timestamptz($1, 1, 1, 0, 0, 0, 'UTC')
          AND d.start_date <  make_timestamptz($1 + 1, 1, 1, 0, 0, 0, 'UTC')
        GROUP BY month
        ORDER BY num_tour_starts DESC, month ASC
        LIMIT 12
        "#,
    )
    .bind(year)
    .fetch_all(db)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;
    use time::OffsetDateTime;

    #[test]
    fn year_bounds() {
        assert_eq!(parse_year("2021").unwrap(), 2021);
        assert_eq!(parse_year("9999").unwrap(), 9999);
        for bad in ["0", "10000", "-5", "twenty", "2021.5", ""] {
            let err = parse_year(bad).unwrap_err();
            assert!(matches!(err, AppError::BadRequest(_)), "{bad}");
        }
    }

    #[test]
    fn stats_serialize_camel_case() {
        let row = DifficultyStats {
            difficulty: "MEDIUM".into(),
            num_tours: 3,
            num_ratings: 20,
            avg_rating: 4.8,
            avg_price: 1497.0,
            min_price: 497.0,
            max_price: 2997.0,
        };
        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(json["numTours"], 3);
        assert_eq!(json["avgPrice"], 1497.0);
    }

    async fn seed_tour(db: &PgPool, name: &str, difficulty: &str, rating: f64, price: f64, dates: &[OffsetDateTime]) {
        sqlx::query(
            "INSERT INTO tours (name, slug, duration, max_group_size, difficulty, ratings_average, \
             ratings_quantity, price, summary, image_cover, start_dates) \
             VALUES ($1, $1, 5, 10, $2, $3, 4, $4, 'summary', 'cover.jpg', $5)",
        )
        .bind(name)
        .bind(difficulty)
        .bind(rating)
        .bind(price)
        .bind(dates)
        .execute(db)
        .await
        .unwrap();
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs DATABASE_URL"]
    async fn stats_skip_easy_and_low_ratings(db: PgPool) {
        seed_tour(&db, "The Forest Hiker", "easy", 4.7, 397.0, &[]).await;
        seed_tour(&db, "The Sea Explorer", "medium", 4.8, 497.0, &[]).await;
        seed_tour(&db, "The Snow Adventurer", "difficult", 4.5, 997.0, &[]).await;
        seed_tour(&db, "The City Wanderer", "medium", 4.0, 1197.0, &[]).await;

        let stats = difficulty_stats(&db).await.unwrap();
        let groups: Vec<&str> = stats.iter().map(|s| s.difficulty.as_str()).collect();
        assert_eq!(groups, vec!["MEDIUM", "DIFFICULT"]);
        assert_eq!(stats[0].num_tours, 1);
        assert_eq!(stats[0].num_ratings, 4);
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs DATABASE_URL"]
    async fn plan_groups_starts_by_month(db: PgPool) {
        seed_tour(
            &db,
            "The Forest Hiker",
            "easy",
            4.7,
            397.0,
            &[datetime!(2021-04-25 9:00 UTC), datetime!(2021-07-20 9:00 UTC), datetime!(2022-07-20 9:00 UTC)],
        )
        .await;
        seed_tour(
            &db,
            "The Sea Explorer",
            "medium",
            4.8,
            497.0,
            &[datetime!(2021-07-19 9:00 UTC)],
        )
        .await;

        let plan = monthly_plan(&db, 2021).await.unwrap();
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0].month, 7);
        assert_eq!(plan[0].num_tour_starts, 2);
        assert_eq!(plan[0].tours, vec!["The Sea Explorer", "The Forest Hiker"]);
        assert_eq!(plan[1].month, 4);
    }
}
