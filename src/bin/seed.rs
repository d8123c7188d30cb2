use argon2::{
    Argon2, PasswordHasher,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum_erp_api::{
    config::AppConfig,
    db::{create_orm_conn, create_pool, run_migrations},
};
use uuid::Uuid;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env()?;

    let pool = create_pool(&config.database_url).await?;
    // Ensure migrations are applied.
    let orm = create_orm_conn(&config.database_url).await?;
    run_migrations(&orm).await?;

    let admin_id = ensure_user(&pool, "admin@example.com", "admin123", "admin").await?;
    let customer_user_id = ensure_user(&pool, "customer@example.com", "customer123", "customer").await?;
    let customer_id = ensure_customer_profile(&pool, customer_user_id, "Demo", "Customer").await?;
    seed_products(&pool).await?;

    println!("Seed completed. Admin ID: {admin_id}, Customer ID: {customer_id}");
    Ok(())
}

async fn ensure_user(
    pool: &sqlx::PgPool,
    email: &str,
    password: &str,
    role: &str,
) -> anyhow::Result<Uuid> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let password_hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!(e.to_string()))?
        .to_string();

    let row: Option<(Uuid,)> = sqlx::query_as(
        r#"
        INSERT INTO users (id, email, password_hash, role)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (email) DO UPDATE SET role = EXCLUDED.role
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(email)
    .bind(password_hash)
    .bind(role)
    .fetch_optional(pool)
    .await?;

    // If user already exists, fetch id
    let user_id = match row {
        Some((id,)) => id,
        None => {
            let existing: (Uuid,) = sqlx::query_as("SELECT id FROM users WHERE email = $1")
                .bind(email)
                .fetch_one(pool)
                .await?;
            existing.0
        }
    };

    println!("Ensured user {email} (role={role})");
    Ok(user_id)
}

async fn ensure_customer_profile(
    pool: &sqlx::PgPool,
    user_id: Uuid,
    first_name: &str,
    last_name: &str,
) -> anyhow::Result<Uuid> {
    sqlx::query(
        r#"
        INSERT INTO customers (id, user_id, first_name, last_name)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (user_id) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(user_id)
    .bind(first_name)
    .bind(last_name)
    .execute(pool)
    .await?;

    let existing: (Uuid,) = sqlx::query_as("SELECT id FROM customers WHERE user_id = $1")
        .bind(user_id)
        .fetch_one(pool)
        .await?;

    println!("Ensured customer profile for user {user_id}");
    Ok(existing.0)
}

async fn seed_products(pool: &sqlx::PgPool) -> anyhow::Result<()> {
    let products: Vec<(&str, &str, &str, i64, i32)> = vec![
        ("WID-STD", "Standard Widget", "Warehouse staple", 2_500, 120),
        ("WID-PRO", "Pro Widget", "Reinforced housing", 7_900, 60),
        ("GAD-MINI", "Mini Gadget", "Fits in a pocket", 1_250, 200),
        ("KIT-DLX", "Deluxe Kit", "Widgets and gadgets boxed together", 19_900, 25),
    ];

    for (sku, name, desc, price, stock) in products {
        sqlx::query(
            r#"
            INSERT INTO products (id, sku, name, description, price, stock)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (sku) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(sku)
        .bind(name)
        .bind(desc)
        .bind(price)
        .bind(stock)
        .execute(pool)
        .await?;
    }

    println!("Seeded products");
    Ok(())
}
