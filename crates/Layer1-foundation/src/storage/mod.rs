//! Storage module for crew
//!
//! - `JsonStore`: JSON 파일 저장/로드 (원자적 쓰기)
//! - `JsonCollection`: id 로 키잉된 영속 맵 (서비스 상태용)

mod json;

pub use json::{JsonCollection, JsonStore};
