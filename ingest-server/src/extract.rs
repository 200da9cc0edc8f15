//! Request extractors

use axum::extract::FromRequest;

use crate::AppError;

/// `Json` body whose rejections are answered like every other [`AppError`]
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct AppJson<T>(pub T);
