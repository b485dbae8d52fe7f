//! Interceptors: instance, family and type interceptors, their order,
//! enrichment and failure reporting.


use keystone_container::prelude::*;
use parking_lot::Mutex;
use std::error::Error as _;
use std::sync::Arc;
use test_utils::*;

type Log = Arc<Mutex<Vec<&'static str>>>;

fn recorder(log: &Log, entry: &'static str) -> InstanceInterceptor {
    let log = Arc::clone(log);
    InstanceInterceptor::on_creation::<ColorWidget, _>(move |_| {
        log.lock().push(entry);
        Ok(())
    })
}

struct Loud(String);

impl Widget for Loud {
    fn color(&self) -> &str {
        &self.0
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ORDER
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn instance_then_family_then_type_interceptors() {
    let log = Log::default();
    let container = build({
        let log = Arc::clone(&log);
        move |graph| {
            graph.add_plugin(&widget(), color_plugin())?;
            graph.add_instance(&widget(), color_instance("Red").intercept_with(recorder(&log, "instance")))?;
            graph.add_family_interceptor(&widget(), recorder(&log, "family"))?;
            graph.add_type_interceptor(TypeInterceptor::for_type::<ColorWidget>(recorder(&log, "type 1")))?;
            graph.add_type_interceptor(TypeInterceptor::for_type::<ColorWidget>(recorder(&log, "type 2")))
        }
    });

    container.get_instance::<dyn Widget>().unwrap();
    assert_eq!(*log.lock(), ["instance", "family", "type 1", "type 2"]);
}

#[test]
fn type_interceptors_only_see_matching_types() {
    let log = Log::default();
    let container = build({
        let log = Arc::clone(&log);
        move |graph| {
            configure_widgets(graph)?;
            configure_handlers(graph)?;
            graph.add_type_interceptor(TypeInterceptor::for_type::<ColorWidget>(recorder(&log, "widget")))
        }
    });

    container.get_all_instances::<dyn Handler>().unwrap();
    assert!(log.lock().is_empty());

    container.get_all_instances::<dyn Widget>().unwrap();
    assert_eq!(log.lock().len(), 2);
}

#[test]
fn cached_objects_are_intercepted_once() {
    let log = Log::default();
    let container = build({
        let log = Arc::clone(&log);
        move |graph| {
            configure_widgets(graph)?;
            graph.set_lifecycle(&widget(), Lifecycle::Singleton)?;
            graph.add_type_interceptor(TypeInterceptor::for_type::<ColorWidget>(recorder(&log, "widget")))
        }
    });

    container.get_instance::<dyn Widget>().unwrap();
    container.get_instance::<dyn Widget>().unwrap();
    assert_eq!(log.lock().len(), 1);
}

// ═══════════════════════════════════════════════════════════════════════════════
// ENRICHMENT
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn enrichment_replaces_the_built_object() {
    let container = build(|graph| {
        configure_widgets(graph)?;
        graph.add_type_interceptor(TypeInterceptor::for_type::<ColorWidget>(InstanceInterceptor::enrich::<
            ColorWidget,
            dyn Widget,
            _,
        >(|inner| {
            Ok(Arc::new(Loud(inner.color.to_uppercase())) as Arc<dyn Widget>)
        })))
    });

    let widget: Arc<dyn Widget> = container.get_instance().unwrap();
    assert_eq!(widget.color(), "RED");
}

#[test]
fn instance_interceptors_apply_to_one_instance() {
    let container = build(|graph| {
        graph.add_plugin(&widget(), color_plugin())?;
        graph.add_instance(
            &widget(),
            color_instance("Red").intercept_with(InstanceInterceptor::enrich::<ColorWidget, dyn Widget, _>(
                |inner| Ok(Arc::new(Loud(inner.color.to_uppercase())) as Arc<dyn Widget>),
            )),
        )?;
        graph.add_instance(&widget(), color_instance("Blue"))
    });

    assert_eq!(container.get_named::<dyn Widget>("Red").unwrap().color(), "RED");
    assert_eq!(container.get_named::<dyn Widget>("Blue").unwrap().color(), "Blue");
}

// ═══════════════════════════════════════════════════════════════════════════════
// FAILURES
// ═══════════════════════════════════════════════════════════════════════════════

fn failing() -> InstanceInterceptor {
    InstanceInterceptor::new(|_| Err("interceptor refused".into()))
}

#[test]
fn instance_interceptor_failures_raise_270() {
    let container = build(|graph| {
        graph.add_plugin(&widget(), color_plugin())?;
        graph.add_instance(&widget(), color_instance("Red").intercept_with(failing()))
    });

    let err = container.get_instance::<dyn Widget>().err().unwrap();
    assert_eq!(err.code().as_u16(), 270);
    assert!(err.to_string().contains("Red"));
    assert_eq!(err.source().unwrap().to_string(), "interceptor refused");
}

#[test]
fn type_interceptor_failures_raise_308() {
    let container = build(|graph| {
        configure_widgets(graph)?;
        graph.add_type_interceptor(TypeInterceptor::for_type::<ColorWidget>(failing()))
    });

    let err = container.get_instance::<dyn Widget>().err().unwrap();
    assert_eq!(err.code().as_u16(), 308);
    assert!(err.to_string().contains("ColorWidget"));
    assert_eq!(err.kind(), err.code().kind());
}

#[test]
fn hooks_on_the_wrong_type_fail_interception() {
    let container = build(|graph| {
        configure_widgets(graph)?;
        graph.add_type_interceptor(TypeInterceptor::for_type::<ColorWidget>(
            InstanceInterceptor::on_creation::<String, _>(|_| Ok(())),
        ))
    });

    let err = container.get_instance::<dyn Widget>().err().unwrap();
    assert_eq!(err.code(), ErrorCode::TypeInterceptionFailed);
}
