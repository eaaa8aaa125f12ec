use storefront_api::db::{create_pool, orm_from_pool, run_migrations};
use uuid::Uuid;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let database_url = std::env::var("DATABASE_URL")?;

    let pool = create_pool(&database_url).await?;
    // Ensure migrations are applied.
    run_migrations(&orm_from_pool(pool.clone())).await?;

    let admin_id = ensure_user(&pool, "admin@example.com", "admin").await?;
    let user_id = ensure_user(&pool, "user@example.com", "user").await?;
    seed_products(&pool).await?;

    println!("Seed completed. Admin ID: {admin_id}, User ID: {user_id}");
    Ok(())
}

async fn ensure_user(pool: &sqlx::PgPool, email: &str, role: &str) -> anyhow::Result<Uuid> {
    let (user_id,): (Uuid,) = sqlx::query_as(
        r#"
        INSERT INTO users (id, email, role)
        VALUES ($1, $2, $3)
        ON CONFLICT (email) DO UPDATE SET role = EXCLUDED.role
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(email)
    .bind(role)
    .fetch_one(pool)
    .await?;

    println!("Ensured user {email} (role={role})");
    Ok(user_id)
}

async fn seed_products(pool: &sqlx::PgPool) -> anyhow::Result<()> {
    // Prices in cents.
    let products = [
        ("Canvas Tote", "Heavy cotton tote bag", 2000_i64),
        ("Enamel Mug", "Camp mug with the store logo", 1200),
        ("Sticker Pack", "Six vinyl stickers", 500),
        ("Field Notebook", "Dot grid, 80 pages", 1550),
    ];

    for (name, desc, price) in products {
        sqlx::query(
            r#"
            INSERT INTO products (id, name, description, price)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (name) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(desc)
        .bind(price)
        .execute(pool)
        .await?;
    }

    println!("Seeded products");
    Ok(())
}
