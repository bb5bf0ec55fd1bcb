//! 파이프라인 trait -- 컴포넌트 생명주기 정의

use std::future::Future;
use std::pin::Pin;

use crate::error::LogweaveError;

/// `Send` 가능한 박스 퓨처
///
/// 객체 안전한 비동기 trait 메서드(예: 사용자 정의 싱크)에서 사용합니다.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// 헬스 체크 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    /// 정상
    Healthy,
    /// 동작하지만 성능 저하 또는 부분 장애
    Degraded(String),
    /// 동작 불가
    Unhealthy(String),
}

impl HealthStatus {
    /// 정상 상태인지 확인합니다.
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }

    /// 동작 불가 상태인지 확인합니다.
    pub fn is_unhealthy(&self) -> bool {
        matches!(self, Self::Unhealthy(_))
    }
}

/// 시작/정지/헬스 체크 생명주기를 가지는 컴포넌트 trait
///
/// 데몬은 이 trait으로 파이프라인을 관리합니다.
/// 구현체는 `async fn`으로 각 메서드를 구현할 수 있습니다.
pub trait Pipeline: Send {
    /// 컴포넌트를 시작합니다.
    fn start(&mut self) -> impl Future<Output = Result<(), LogweaveError>> + Send;

    /// 컴포넌트를 정지합니다.
    fn stop(&mut self) -> impl Future<Output = Result<(), LogweaveError>> + Send;

    /// 현재 헬스 상태를 반환합니다.
    fn health_check(&self) -> impl Future<Output = HealthStatus> + Send;
}
