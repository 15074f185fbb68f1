use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: String,
    pub password: String,
    pub role: String,
    pub avatar: Option<String>,
    pub cart: Vec<String>,
    pub likes: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// Public projection of a user. This is what goes into tokens and responses;
// the stored password hash never leaves the users collection.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct UserDto {
    pub id: String,
    pub username: String,
    pub email: String,
    pub role: String,
}

impl From<&User> for UserDto {
    fn from(user: &User) -> Self {
        UserDto {
            id: user.id.clone(),
            username: user.username.clone(),
            email: user.email.clone(),
            role: user.role.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SignUpInput {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub role: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SignInInput {
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct Claims {
    pub user: UserDto,
    pub exp: usize, // Expiration time as UTC timestamp
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Product {
    pub id: String,
    pub user: String,
    pub title: String,
    pub body: String,
    pub category: String,
    pub price: f64,
    pub rate: f64,
    pub stock: i64,
    pub size: Option<String>,
    pub dimensions: Option<String>,
    pub warranty: Option<String>,
    pub materials: Option<String>,
    pub images: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// Partial update; only the provided fields are written.
#[derive(Debug, Deserialize)]
pub struct UpdateProductInput {
    pub title: Option<String>,
    pub body: Option<String>,
    pub category: Option<String>,
    pub price: Option<f64>,
    pub rate: Option<f64>,
    pub stock: Option<i64>,
    pub size: Option<String>,
    pub dimensions: Option<String>,
    pub warranty: Option<String>,
    pub materials: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Comment {
    pub id: String,
    pub user: String,
    pub product: String,
    pub comment: String,
}

#[derive(Debug, Deserialize)]
pub struct CommentInput {
    pub comment: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_user() -> User {
        let now = Utc::now();
        User {
            id: "u-1".to_string(),
            username: "rita".to_string(),
            email: "rita@example.com".to_string(),
            password: "$argon2i$v=19$m=4096,t=3,p=1$c2FsdA$hash".to_string(),
            role: "User".to_string(),
            avatar: None,
            cart: vec![],
            likes: vec![],
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn projection_excludes_password() {
        let dto = UserDto::from(&sample_user());
        let value = serde_json::to_value(&dto).unwrap();

        assert!(value.get("password").is_none());
        assert_eq!(value["id"], "u-1");
        assert_eq!(value["username"], "rita");
        assert_eq!(value["email"], "rita@example.com");
        assert_eq!(value["role"], "User");
    }

    #[test]
    fn user_document_round_trips_through_bson() {
        let user = sample_user();
        let doc = mongodb::bson::to_document(&user).unwrap();
        let back: User = mongodb::bson::from_document(doc).unwrap();

        assert_eq!(back.id, user.id);
        assert_eq!(back.email, user.email);
        assert_eq!(back.cart, user.cart);
        assert_eq!(back.created_at, user.created_at);
    }
}
