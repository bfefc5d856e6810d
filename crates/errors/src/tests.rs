#[cfg(test)]
mod error_tests {
    use crate::*;

    #[test]
    fn test_error_display() {
        let error = ControlPlaneError::validation("任务ID为空");
        assert_eq!(error.to_string(), "数据验证失败: 任务ID为空");

        let error = ControlPlaneError::not_found("节点", "node-1");
        assert_eq!(error.to_string(), "节点未找到: node-1");

        let error = ControlPlaneError::resource("队列已满");
        assert_eq!(error.to_string(), "资源不足: 队列已满");

        let error = ControlPlaneError::timeout("会话过期");
        assert_eq!(error.to_string(), "操作超时: 会话过期");

        let error = ControlPlaneError::consensus("投票不一致");
        assert_eq!(error.to_string(), "未达成共识: 投票不一致");

        let error = ControlPlaneError::dependency("缺少进程 p-2");
        assert_eq!(error.to_string(), "依赖未满足: 缺少进程 p-2");
    }

    #[test]
    fn test_error_kind_mapping() {
        assert_eq!(
            ControlPlaneError::validation("x").kind(),
            ErrorKind::Validation
        );
        assert_eq!(ControlPlaneError::not_found("a", "b").kind(), ErrorKind::NotFound);
        assert_eq!(ControlPlaneError::resource("x").kind(), ErrorKind::Resource);
        assert_eq!(ControlPlaneError::timeout("x").kind(), ErrorKind::Timeout);
        assert_eq!(ControlPlaneError::consensus("x").kind(), ErrorKind::Consensus);
        assert_eq!(ControlPlaneError::dependency("x").kind(), ErrorKind::Dependency);
        assert_eq!(
            ControlPlaneError::Serialization("x".to_string()).kind(),
            ErrorKind::Internal
        );
    }

    #[test]
    fn test_context_preserves_kind() {
        let error = ControlPlaneError::resource("执行器负载过高")
            .with_context("scheduler")
            .with_annotation("task_id", "t-1")
            .with_annotation("load", 0.95);

        assert_eq!(error.kind(), ErrorKind::Resource);
        assert_eq!(error.code(), "RESOURCE");
        assert!(matches!(error.root(), ControlPlaneError::Resource(_)));

        let display = error.to_string();
        assert!(display.starts_with("[scheduler] 资源不足: 执行器负载过高"));
        assert!(display.contains("load=0.95"));
        assert!(display.contains("task_id=t-1"));
    }

    #[test]
    fn test_nested_context() {
        let error = ControlPlaneError::consensus("票数不足")
            .with_context("coordinator")
            .with_context("app");
        assert_eq!(error.kind(), ErrorKind::Consensus);
        assert!(error.to_string().contains("[app] [coordinator]"));
    }

    #[test]
    fn test_annotation_without_layer() {
        let error = ControlPlaneError::validation("bad").with_annotation("field", "id");
        match &error {
            ControlPlaneError::Context {
                layer, annotations, ..
            } => {
                assert_eq!(layer, "unknown");
                assert_eq!(annotations.get("field").map(String::as_str), Some("id"));
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn test_result_ext() {
        let result: ControlPlaneResult<()> = Err(ControlPlaneError::timeout("deadline"));
        let wrapped = result.context_layer("resolver").annotate("attempt", 3);
        let error = wrapped.unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Timeout);
        assert!(error.to_string().contains("attempt=3"));
    }

    #[test]
    fn test_is_fatal_and_retryable() {
        assert!(ControlPlaneError::internal("boom").is_fatal());
        assert!(ControlPlaneError::config_error("bad").is_fatal());
        assert!(!ControlPlaneError::validation("bad").is_fatal());

        assert!(ControlPlaneError::timeout("t").is_retryable());
        assert!(ControlPlaneError::resource("r").is_retryable());
        assert!(ControlPlaneError::consensus("c").is_retryable());
        assert!(!ControlPlaneError::validation("v").is_retryable());
        assert!(!ControlPlaneError::not_found("a", "b").is_retryable());
    }

    #[test]
    fn test_user_message() {
        assert_eq!(
            ControlPlaneError::validation("x").user_message(),
            "输入数据验证失败"
        );
        assert_eq!(
            ControlPlaneError::resource("x").with_context("l").user_message(),
            "系统资源不足，请稍后重试"
        );
        assert_eq!(
            ControlPlaneError::internal("x").user_message(),
            "系统繁忙，请稍后重试"
        );
    }

    #[test]
    fn test_from_serde_json() {
        let err = serde_json::from_str::<serde_json::Value>("{invalid").unwrap_err();
        let error: ControlPlaneError = err.into();
        assert!(matches!(error, ControlPlaneError::Serialization(_)));
    }

    #[test]
    fn test_kind_serialization() {
        let json = serde_json::to_string(&ErrorKind::NotFound).unwrap();
        assert_eq!(json, "\"not_found\"");
    }
}
