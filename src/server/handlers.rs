//! Record handlers backed by a [`RecordService`].

use std::sync::Arc;

use super::registry::HandlerRegistry;
use crate::protocol::MessageKind;
use crate::store::RecordService;

/// Register the get-record and list-records handlers on `registry`.
///
/// - `GetRecord`: the request payload is the UTF-8 record id
/// - `ListRecords`: the request payload is ignored
pub fn register_record_handlers(registry: &mut HandlerRegistry, service: Arc<dyn RecordService>) {
    let lookup = service.clone();
    registry.register(MessageKind::GetRecord, move |id: String| {
        let service = lookup.clone();
        async move { service.get_by_id(&id).await }
    });

    registry.register(MessageKind::ListRecords, move |_: ()| {
        let service = service.clone();
        async move { service.get_all().await }
    });
}
