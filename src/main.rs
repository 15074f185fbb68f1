use std::collections::HashMap;
use std::env;

use actix_multipart::Multipart;
use actix_web::{web, App, HttpMessage, HttpRequest, HttpResponse, HttpServer};
use argon2::{self, Config as ArgonConfig};
use chrono::Utc;
use futures::StreamExt;
use jsonwebtoken::{encode, EncodingKey, Header};
use mongodb::bson::{doc, Document};
use mongodb::options::{FindOneAndUpdateOptions, ReturnDocument};
use mongodb::Collection;
use rand::Rng;
use serde_json::json;
use uuid::Uuid;

mod db;
mod errors;
mod middleware;
mod models;
mod upload;

use errors::ApiError;
use models::{Comment, Product, User, UserDto};

struct Config {
    jwt_secret: String,
}

fn issue_token(user: &UserDto, secret: &str) -> Result<String, ApiError> {
    let expiration = Utc::now()
        .checked_add_signed(chrono::Duration::days(30))
        .expect("valid timestamp")
        .timestamp() as usize;

    let claims = models::Claims {
        user: user.clone(),
        exp: expiration,
    };

    Ok(encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_ref()),
    )?)
}

// The auth middleware puts the decoded projection into request extensions;
// protected handlers read it back from there.
fn auth_user(req: &HttpRequest) -> Result<UserDto, ApiError> {
    req.extensions()
        .get::<UserDto>()
        .cloned()
        .ok_or_else(|| ApiError::Unauthorized("Login required".to_string()))
}

fn search_filter(query: &str) -> Document {
    doc! {
        "$or": [
            { "title": { "$regex": query, "$options": "i" } },
            { "body": { "$regex": query, "$options": "i" } },
        ]
    }
}

fn return_updated() -> FindOneAndUpdateOptions {
    FindOneAndUpdateOptions::builder()
        .return_document(ReturnDocument::After)
        .build()
}

struct UploadedFile {
    field: String,
    name: String,
    content_type: Option<String>,
    data: Vec<u8>,
}

impl UploadedFile {
    fn is_image(&self) -> bool {
        self.content_type
            .as_deref()
            .map(|ct| ct.starts_with("image/"))
            .unwrap_or(false)
    }
}

// Buffers a whole multipart body: plain fields into a map, file fields
// into a list keyed by their form field name.
async fn collect_multipart(
    mut payload: Multipart,
) -> Result<(HashMap<String, String>, Vec<UploadedFile>), ApiError> {
    let mut fields = HashMap::new();
    let mut files = Vec::new();

    while let Some(item) = payload.next().await {
        let mut field = item.map_err(|err| {
            log::debug!("broken multipart field: {}", err);
            ApiError::Validation("Malformed multipart payload".to_string())
        })?;

        let disposition = field.content_disposition();
        let field_name = disposition.get_name().unwrap_or_default().to_string();
        let file_name = disposition.get_filename().map(|name| name.to_string());
        let content_type = field.content_type().map(|mime| mime.essence_str().to_string());

        let mut data = Vec::new();
        while let Some(chunk) = field.next().await {
            let chunk = chunk.map_err(|err| {
                log::debug!("broken multipart chunk: {}", err);
                ApiError::Validation("Malformed multipart payload".to_string())
            })?;
            data.extend_from_slice(&chunk);
        }

        match file_name {
            Some(name) => files.push(UploadedFile {
                field: field_name,
                name,
                content_type,
                data,
            }),
            None => {
                fields.insert(field_name, String::from_utf8_lossy(&data).into_owned());
            }
        }
    }

    Ok((fields, files))
}

async fn index() -> HttpResponse {
    HttpResponse::Ok().json(json!({ "message": "success" }))
}

async fn create_user(
    users: web::Data<Collection<User>>,
    config: web::Data<Config>,
    input: web::Json<models::SignUpInput>,
) -> Result<HttpResponse, ApiError> {
    let username = input.username.as_deref().filter(|v| !v.trim().is_empty());
    let email = input.email.as_deref().filter(|v| !v.trim().is_empty());
    let password = input.password.as_deref().filter(|v| !v.trim().is_empty());
    let (Some(username), Some(email), Some(password)) = (username, email, password) else {
        return Err(ApiError::Validation("All fields are required".to_string()));
    };

    let existing = users.find_one(doc! { "email": email }, None).await?;
    if existing.is_some() {
        return Err(ApiError::Conflict("Email already exists".to_string()));
    }

    let salt: [u8; 16] = rand::thread_rng().gen();
    let hashed_password = argon2::hash_encoded(password.as_bytes(), &salt, &ArgonConfig::default())?;

    let now = Utc::now();
    let user = User {
        id: Uuid::new_v4().to_string(),
        username: username.to_string(),
        email: email.to_string(),
        password: hashed_password,
        role: input.role.clone().unwrap_or_else(|| "User".to_string()),
        avatar: None,
        cart: vec![],
        likes: vec![],
        created_at: now,
        updated_at: now,
    };
    users.insert_one(&user, None).await?;

    let dto = UserDto::from(&user);
    let access_token = issue_token(&dto, &config.jwt_secret)?;

    Ok(HttpResponse::Ok().json(json!({
        "message": "User added successfully",
        "error": false,
        "user": dto,
        "accessToken": access_token,
    })))
}

async fn login(
    users: web::Data<Collection<User>>,
    config: web::Data<Config>,
    input: web::Json<models::SignInInput>,
) -> Result<HttpResponse, ApiError> {
    let email = input.email.as_deref().filter(|v| !v.trim().is_empty());
    let password = input.password.as_deref().filter(|v| !v.trim().is_empty());
    let (Some(email), Some(password)) = (email, password) else {
        return Err(ApiError::Validation("All fields are required".to_string()));
    };

    let user = users
        .find_one(doc! { "email": email }, None)
        .await?
        .ok_or_else(|| ApiError::NotFound("User with this email not found".to_string()))?;

    if !argon2::verify_encoded(&user.password, password.as_bytes()).unwrap_or(false) {
        return Err(ApiError::Auth("Incorrect password".to_string()));
    }

    let dto = UserDto::from(&user);
    let access_token = issue_token(&dto, &config.jwt_secret)?;

    Ok(HttpResponse::Ok().json(json!({
        "message": "Login successful",
        "error": false,
        "user": dto,
        "accessToken": access_token,
    })))
}

async fn get_user(
    users: web::Data<Collection<User>>,
    user_id: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let user = users
        .find_one(doc! { "id": &user_id.into_inner() }, None)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;

    Ok(HttpResponse::Ok().json(json!({
        "message": "User found",
        "error": false,
        "user": UserDto::from(&user),
    })))
}

async fn all_users(users: web::Data<Collection<User>>) -> Result<HttpResponse, ApiError> {
    let mut cursor = users.find(None, None).await?;
    let mut result = Vec::new();
    while let Some(user) = cursor.next().await {
        result.push(UserDto::from(&user?));
    }

    Ok(HttpResponse::Ok().json(json!({
        "message": "all users",
        "error": false,
        "users": result,
    })))
}

async fn create_product(
    users: web::Data<Collection<User>>,
    products: web::Data<Collection<Product>>,
    uploads: web::Data<upload::FileUpload>,
    req: HttpRequest,
    payload: Multipart,
) -> Result<HttpResponse, ApiError> {
    let auth = auth_user(&req)?;
    let (fields, files) = collect_multipart(payload).await?;

    let title = fields.get("title").filter(|v| !v.trim().is_empty());
    let body = fields.get("body").filter(|v| !v.trim().is_empty());
    let category = fields.get("category").filter(|v| !v.trim().is_empty());
    let price = fields.get("price").and_then(|v| v.parse::<f64>().ok());
    let (Some(title), Some(body), Some(category), Some(price)) = (title, body, category, price)
    else {
        return Err(ApiError::Validation(
            "Invalid request data. Please provide all required fields.".to_string(),
        ));
    };

    let images: Vec<&UploadedFile> = files.iter().filter(|f| f.field == "images").collect();
    if images.is_empty() {
        return Err(ApiError::Validation(
            "No images uploaded. Please provide at least one image.".to_string(),
        ));
    }
    if images.iter().any(|image| !image.is_image()) {
        return Err(ApiError::Validation(
            "Invalid file type. Only image files are allowed.".to_string(),
        ));
    }

    let mut uploaded = Vec::with_capacity(images.len());
    for image in &images {
        uploaded.push(uploads.save(&image.name, &image.data)?);
    }

    let owner = users
        .find_one(doc! { "id": &auth.id }, None)
        .await?
        .ok_or_else(|| ApiError::Unauthorized("Not authorized".to_string()))?;

    let now = Utc::now();
    let product = Product {
        id: Uuid::new_v4().to_string(),
        user: owner.id,
        title: title.clone(),
        body: body.clone(),
        category: category.clone(),
        price,
        rate: fields.get("rate").and_then(|v| v.parse().ok()).unwrap_or(0.0),
        stock: fields.get("stock").and_then(|v| v.parse().ok()).unwrap_or(0),
        size: fields.get("size").cloned(),
        dimensions: fields.get("dimensions").cloned(),
        warranty: fields.get("warranty").cloned(),
        materials: fields.get("materials").cloned(),
        images: uploaded,
        created_at: now,
        updated_at: now,
    };
    products.insert_one(&product, None).await?;

    Ok(HttpResponse::Created().json(json!({
        "message": "Product created successfully",
        "error": false,
        "data": product,
    })))
}

async fn get_product(
    products: web::Data<Collection<Product>>,
    id: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let product = products
        .find_one(doc! { "id": &id.into_inner() }, None)
        .await?
        .ok_or_else(|| ApiError::NotFound("Product not found".to_string()))?;

    Ok(HttpResponse::Ok().json(json!({
        "message": "Product fetched successfully",
        "error": false,
        "data": product,
    })))
}

async fn update_product(
    products: web::Data<Collection<Product>>,
    id: web::Path<String>,
    input: web::Json<models::UpdateProductInput>,
) -> Result<HttpResponse, ApiError> {
    let mut changes = Document::new();
    if let Some(title) = &input.title {
        changes.insert("title", title);
    }
    if let Some(body) = &input.body {
        changes.insert("body", body);
    }
    if let Some(category) = &input.category {
        changes.insert("category", category);
    }
    if let Some(price) = input.price {
        changes.insert("price", price);
    }
    if let Some(rate) = input.rate {
        changes.insert("rate", rate);
    }
    if let Some(stock) = input.stock {
        changes.insert("stock", stock);
    }
    if let Some(size) = &input.size {
        changes.insert("size", size);
    }
    if let Some(dimensions) = &input.dimensions {
        changes.insert("dimensions", dimensions);
    }
    if let Some(warranty) = &input.warranty {
        changes.insert("warranty", warranty);
    }
    if let Some(materials) = &input.materials {
        changes.insert("materials", materials);
    }
    if changes.is_empty() {
        return Err(ApiError::Validation(
            "At least one field must be provided".to_string(),
        ));
    }
    changes.insert("updated_at", Utc::now().to_rfc3339());

    let updated = products
        .find_one_and_update(
            doc! { "id": &id.into_inner() },
            doc! { "$set": changes },
            return_updated(),
        )
        .await?
        .ok_or_else(|| ApiError::NotFound("Product not found".to_string()))?;

    Ok(HttpResponse::Ok().json(json!({
        "message": "Product updated successfully",
        "error": false,
        "data": updated,
    })))
}

async fn delete_product(
    products: web::Data<Collection<Product>>,
    id: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let deleted = products
        .find_one_and_delete(doc! { "id": &id.into_inner() }, None)
        .await?
        .ok_or_else(|| ApiError::NotFound("Product not found".to_string()))?;

    Ok(HttpResponse::Ok().json(json!({
        "message": "Product deleted successfully",
        "error": false,
        "data": deleted,
    })))
}

async fn products_by_category(
    products: web::Data<Collection<Product>>,
    category: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let mut cursor = products
        .find(doc! { "category": &category.into_inner() }, None)
        .await?;
    let mut result = Vec::new();
    while let Some(product) = cursor.next().await {
        result.push(product?);
    }

    if result.is_empty() {
        return Err(ApiError::NotFound(
            "No products found for this category".to_string(),
        ));
    }

    Ok(HttpResponse::Ok().json(json!({
        "message": "Products fetched successfully",
        "error": false,
        "data": result,
    })))
}

async fn search_products(
    products: web::Data<Collection<Product>>,
    query: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let mut cursor = products.find(search_filter(&query.into_inner()), None).await?;
    let mut result = Vec::new();
    while let Some(product) = cursor.next().await {
        result.push(product?);
    }

    if result.is_empty() {
        return Err(ApiError::NotFound(
            "No products found matching the search query".to_string(),
        ));
    }

    Ok(HttpResponse::Ok().json(json!({
        "message": "Products fetched successfully",
        "error": false,
        "data": result,
    })))
}

async fn all_products(products: web::Data<Collection<Product>>) -> Result<HttpResponse, ApiError> {
    let mut cursor = products.find(None, None).await?;
    let mut result = Vec::new();
    while let Some(product) = cursor.next().await {
        result.push(product?);
    }

    // Unlike category/search, an empty catalogue is an empty list.
    Ok(HttpResponse::Ok().json(json!({
        "message": "all products",
        "error": false,
        "products": result,
    })))
}

async fn add_to_cart(
    users: web::Data<Collection<User>>,
    products: web::Data<Collection<Product>>,
    product_id: web::Path<String>,
    req: HttpRequest,
) -> Result<HttpResponse, ApiError> {
    let auth = auth_user(&req)?;
    let product_id = product_id.into_inner();

    products
        .find_one(doc! { "id": &product_id }, None)
        .await?
        .ok_or_else(|| ApiError::NotFound("Product not found".to_string()))?;

    // $addToSet keeps the cart a set; adding twice is a no-op.
    let updated = users
        .find_one_and_update(
            doc! { "id": &auth.id },
            doc! { "$addToSet": { "cart": &product_id } },
            return_updated(),
        )
        .await?
        .ok_or_else(|| ApiError::Unauthorized("Not authorized".to_string()))?;

    Ok(HttpResponse::Ok().json(json!({
        "message": "Product added to cart successfully",
        "error": false,
        "data": updated.cart,
    })))
}

async fn like_product(
    users: web::Data<Collection<User>>,
    products: web::Data<Collection<Product>>,
    product_id: web::Path<String>,
    req: HttpRequest,
) -> Result<HttpResponse, ApiError> {
    let auth = auth_user(&req)?;
    let product_id = product_id.into_inner();

    products
        .find_one(doc! { "id": &product_id }, None)
        .await?
        .ok_or_else(|| ApiError::NotFound("Product not found".to_string()))?;

    let updated = users
        .find_one_and_update(
            doc! { "id": &auth.id },
            doc! { "$addToSet": { "likes": &product_id } },
            return_updated(),
        )
        .await?
        .ok_or_else(|| ApiError::Unauthorized("Not authorized".to_string()))?;

    Ok(HttpResponse::Ok().json(json!({
        "message": "Product added to likes successfully",
        "error": false,
        "data": updated.likes,
    })))
}

async fn user_cart(
    users: web::Data<Collection<User>>,
    products: web::Data<Collection<Product>>,
    req: HttpRequest,
) -> Result<HttpResponse, ApiError> {
    let auth = auth_user(&req)?;
    let user = users
        .find_one(doc! { "id": &auth.id }, None)
        .await?
        .ok_or_else(|| ApiError::Unauthorized("Not authorized".to_string()))?;

    // Best effort: a cart entry whose product is gone stays in the
    // response as null.
    let mut items = Vec::with_capacity(user.cart.len());
    for product_id in &user.cart {
        items.push(products.find_one(doc! { "id": product_id }, None).await?);
    }

    Ok(HttpResponse::Ok().json(json!({
        "message": "Okay",
        "error": false,
        "products": items,
    })))
}

async fn remove_from_cart(
    users: web::Data<Collection<User>>,
    product_id: web::Path<String>,
    req: HttpRequest,
) -> Result<HttpResponse, ApiError> {
    let auth = auth_user(&req)?;

    let updated = users
        .find_one_and_update(
            doc! { "id": &auth.id },
            doc! { "$pull": { "cart": &product_id.into_inner() } },
            return_updated(),
        )
        .await?
        .ok_or_else(|| ApiError::Unauthorized("Not authorized".to_string()))?;

    Ok(HttpResponse::Ok().json(json!({
        "message": "Product removed from cart",
        "error": false,
        "data": updated.cart,
    })))
}

async fn update_avatar(
    users: web::Data<Collection<User>>,
    uploads: web::Data<upload::FileUpload>,
    req: HttpRequest,
    payload: Multipart,
) -> Result<HttpResponse, ApiError> {
    let auth = auth_user(&req)?;
    let (_fields, files) = collect_multipart(payload).await?;

    let avatar = files
        .into_iter()
        .find(|f| f.field == "avatar")
        .ok_or_else(|| ApiError::Validation("Avatar is required.".to_string()))?;

    let filename = uploads.save(&avatar.name, &avatar.data)?;

    let result = users
        .update_one(
            doc! { "id": &auth.id },
            doc! { "$set": { "avatar": &filename, "updated_at": Utc::now().to_rfc3339() } },
            None,
        )
        .await?;
    if result.matched_count == 0 {
        return Err(ApiError::NotFound("User not found.".to_string()));
    }

    Ok(HttpResponse::Ok().json(json!({
        "message": "User updated successfully.",
        "error": false,
        "avatar": filename,
    })))
}

async fn create_comment(
    comments: web::Data<Collection<Comment>>,
    product_id: web::Path<String>,
    input: web::Json<models::CommentInput>,
    req: HttpRequest,
) -> Result<HttpResponse, ApiError> {
    let auth = auth_user(&req)?;

    // No existence check on the product; a comment may reference an id
    // that was never created or is gone.
    let comment = Comment {
        id: Uuid::new_v4().to_string(),
        user: auth.id,
        product: product_id.into_inner(),
        comment: input.comment.clone(),
    };
    comments.insert_one(&comment, None).await?;

    Ok(HttpResponse::Created().json(json!({
        "message": "Comment created successfully",
        "error": false,
        "data": comment,
    })))
}

async fn delete_comment(
    comments: web::Data<Collection<Comment>>,
    comment_id: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    // Deleting an unknown id is still a success.
    comments
        .delete_one(doc! { "id": &comment_id.into_inner() }, None)
        .await?;

    Ok(HttpResponse::Ok().json(json!({
        "message": "Comment deleted successfully",
        "error": false,
    })))
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok(); // Load environment variables from .env file
    env_logger::init();

    let db = db::connect().await;
    let users: Collection<User> = db.collection("users");
    let products: Collection<Product> = db.collection("products");
    let comments: Collection<Comment> = db.collection("comments");

    let jwt_secret = env::var("JWT_SECRET").expect("JWT_SECRET must be set");
    let upload_dir = env::var("UPLOAD_DIR").unwrap_or_else(|_| "static".to_string());
    let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port: u16 = env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8000);

    log::info!("starting server on {}:{}", host, port);

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(users.clone()))
            .app_data(web::Data::new(products.clone()))
            .app_data(web::Data::new(comments.clone()))
            .app_data(web::Data::new(Config {
                jwt_secret: jwt_secret.clone(),
            }))
            .app_data(web::Data::new(upload::FileUpload::new(upload_dir.clone())))
            // Public routes
            .route("/", web::get().to(index))
            .route("/api/create-user", web::post().to(create_user))
            .route("/api/login", web::post().to(login))
            .route("/api/get-user/{user_id}", web::get().to(get_user))
            .route("/api/all-users", web::get().to(all_users))
            .route("/get-product/{id}", web::get().to(get_product))
            .route("/api/update-product/{id}", web::put().to(update_product))
            .route("/remove-product/{id}", web::delete().to(delete_product))
            .route(
                "/api/get-product-with-category/{category}",
                web::get().to(products_by_category),
            )
            .route("/api/search/{query}", web::get().to(search_products))
            .route("/api/all-products", web::get().to(all_products))
            .service(actix_files::Files::new("/static", upload_dir.clone()))
            // Protected routes
            .service(
                web::scope("")
                    .wrap(middleware::AuthMiddleware::new(jwt_secret.clone()))
                    .route("/api/create-product", web::post().to(create_product))
                    .route("/api/add-to-cart/{product_id}", web::post().to(add_to_cart))
                    .route("/api/user-cart", web::get().to(user_cart))
                    .route(
                        "/api/remove-from-cart/{product_id}",
                        web::delete().to(remove_from_cart),
                    )
                    .route("/api/like/{product_id}", web::post().to(like_product))
                    .route("/api/update-user", web::put().to(update_avatar))
                    .service(
                        web::resource("/api/comment/{id}")
                            .route(web::post().to(create_comment))
                            .route(web::delete().to(delete_comment)),
                    ),
            )
    })
    .bind((host.as_str(), port))?
    .run()
    .await
}
