#[derive(Debug)]
#[derive(sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub hash: String,
    #[allow(dead_code)]
    pub email: String,
}
