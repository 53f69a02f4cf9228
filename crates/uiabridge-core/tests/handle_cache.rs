//! Handle cache tests against the in-memory host.

mod common;

use serde_json::json;

use common::login_host;

use uiabridge_core::error::BridgeError;
use uiabridge_core::handle::{HandleCache, HandleRef, APP_HANDLE};
use uiabridge_core::host::{ElementRef, UiApplication, UiTarget};
use uiabridge_core::memory::NilElement;

#[tokio::test]
async fn test_handles_are_monotonic_and_stable() {
    let host = login_host();
    let app = host.front_most_app().await.unwrap();
    let mut cache = HandleCache::new(app.root());
    let login: ElementRef = host.find("Login").unwrap();
    let user: ElementRef = host.find("user").unwrap();

    let first = cache.put(login.clone()).unwrap();
    let second = cache.put(user).unwrap();
    cache.release(first);
    let third = cache.put(login).unwrap();

    assert_eq!((first, second, third), (2, 3, 4));
    let resolved = cache.resolve(host.as_ref(), &HandleRef::Id(second)).await.unwrap();
    assert_eq!(resolved.element_dict().await.unwrap().name.as_deref(), Some("user"));
    assert!(matches!(
        cache.resolve(host.as_ref(), &HandleRef::Id(first)).await,
        Err(BridgeError::UnknownHandle(2))
    ));
}

#[tokio::test]
async fn test_nil_elements_get_no_handle() {
    let host = login_host();
    let mut cache = HandleCache::new(host.front_most_app().await.unwrap().root());

    assert_eq!(cache.put(std::sync::Arc::new(NilElement)), None);
    assert_eq!(cache.put(host.find("Login").unwrap()), Some(2));
}

#[tokio::test]
async fn test_app_handle_survives_release_and_rebinds() {
    let host = login_host();
    let mut cache = HandleCache::new(host.front_most_app().await.unwrap().root());

    assert!(!cache.release(APP_HANDLE));
    cache.release_all();
    assert!(cache.contains(APP_HANDLE));

    host.relaunch().await;
    let app = cache.resolve(host.as_ref(), &HandleRef::Id(APP_HANDLE)).await.unwrap();
    assert!(app.is_valid().await);
}

#[tokio::test]
async fn test_release_invalid_counts_dropped_handles() {
    let host = login_host();
    let mut cache = HandleCache::new(host.front_most_app().await.unwrap().root());
    cache.put(host.find("Login").unwrap());
    cache.put(host.find("user").unwrap());

    host.find("Login").unwrap().invalidate();

    assert_eq!(cache.release_invalid().await, 1);
    assert_eq!(cache.len(), 2);
}

#[test]
fn test_handle_reference_parsing() {
    assert_eq!(HandleRef::from_value(&json!(7)), HandleRef::Id(7));
    assert_eq!(HandleRef::from_value(&json!("/classname='UIAWindow'")), HandleRef::Locator("/classname='UIAWindow'".into()));
    assert!(matches!(HandleRef::from_value(&json!(-3)), HandleRef::Invalid(_)));
    assert!(matches!(HandleRef::from_value(&json!(null)), HandleRef::Invalid(_)));
    assert!(HandleCache::is_locator("/CLASSNAME = \"UIAButton\""));
    assert!(!HandleCache::is_locator("/name='Login'"));
}

#[tokio::test]
async fn test_locator_is_resolved_against_current_app() {
    let host = login_host();
    let mut cache = HandleCache::new(host.front_most_app().await.unwrap().root());
    let reference = HandleRef::Locator("/classname='UIAWindow'/classname='UIASlider'".into());

    let slider = cache.resolve(host.as_ref(), &reference).await.unwrap();

    assert_eq!(slider.element_dict().await.unwrap().value.as_deref(), Some("50%"));
    assert_eq!(cache.len(), 1, "locators do not issue handles");
}

#[tokio::test]
async fn test_app_root_is_application_root() {
    let host = login_host();
    let app = host.front_most_app().await.unwrap();
    assert_eq!(UiApplication::root(app.as_ref()).element_dict().await.unwrap().classname, "UIAApplication");
}
