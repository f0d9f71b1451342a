use axum::extract::{Path, State};
use std::collections::HashMap;

use crate::app::AppState;
use crate::database::models::{User, UserFields};
use crate::error::ApiError;
use crate::filter::{FilterData, Predicate};
use crate::middleware::{ApiResponse, ApiResult, ValidJson};

/// Users who are married or at least 18.
pub fn married_or_adult() -> Predicate {
    Predicate::or(vec![Predicate::eq("married", true), Predicate::gte("age", 18)])
}

/// Empty result sets answer 404 with `data: []`, everything else 200.
fn list_response(users: Vec<User>, empty_message: &str, message: &str) -> ApiResponse<Vec<User>> {
    if users.is_empty() {
        ApiResponse::not_found(empty_message, users)
    } else {
        ApiResponse::ok(message, users)
    }
}

fn parse_id(raw: &str) -> Result<i64, ApiError> {
    match raw.parse::<i64>() {
        Ok(id) if id > 0 => Ok(id),
        _ => {
            let mut field_errors = HashMap::new();
            field_errors.insert("id".to_string(), format!("'{}' is not a positive integer id", raw));
            Err(ApiError::validation_error("Invalid user id", Some(field_errors)))
        }
    }
}

/// GET /users
pub async fn list(State(state): State<AppState>) -> ApiResult<Vec<User>> {
    let users = state.users.find_many(FilterData::default()).await?;
    Ok(list_response(users, "No users found", "Users fetched successfully"))
}

/// GET /married-users
pub async fn list_married(State(state): State<AppState>) -> ApiResult<Vec<User>> {
    let filter = FilterData {
        where_clause: Some(married_or_adult()),
        ..Default::default()
    };
    let users = state.users.find_many(filter).await?;
    Ok(list_response(users, "No married users found", "Users fetched successfully"))
}

/// GET /user/:id
pub async fn get(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<User> {
    let id = parse_id(&id)?;
    match state.users.find_unique(id).await? {
        Some(user) => Ok(ApiResponse::ok("User fetched successfully", user)),
        None => Err(ApiError::not_found(format!("User {} not found", id))),
    }
}

/// PUT /user/:id
pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ValidJson(fields): ValidJson<UserFields>,
) -> ApiResult<User> {
    let id = parse_id(&id)?;
    fields
        .validate()
        .map_err(|field_errors| ApiError::validation_error("Invalid user fields", Some(field_errors)))?;

    let user = state.users.update(id, &fields).await?;
    tracing::info!("Updated user {}", user.id);
    Ok(ApiResponse::ok("User updated successfully", user))
}
