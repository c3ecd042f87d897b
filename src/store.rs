//! Observable container for the current [`TransformState`].
//!
//! Every write goes through a setter, and subscribers hear about it after the
//! write lands, with the field that changed and a fresh snapshot.

use parking_lot::Mutex;
use serde::{Deserialize, Deserializer, Serialize};

use crate::observe::{SubscriptionId, Subscribers};
use crate::transform::{Area, OutputFormat, Time, TransformState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum TransformField {
    Time,
    Area,
    Scale,
    FlipH,
    FlipV,
    Mute,
    OutputFormat,
    WebpFrameRate,
    WebpQuality,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformChange {
    /// `None` when the whole state was reset.
    pub field: Option<TransformField>,
    pub state: TransformState,
}

/// Partial update in the same JSON shape as [`TransformState`]. For optional
/// fields, an explicit `null` clears the value and a missing key leaves it alone.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformPatch {
    #[serde(default, deserialize_with = "present")]
    pub time: Option<Option<Time>>,
    #[serde(default, deserialize_with = "present")]
    pub area: Option<Option<Area>>,
    pub scale: Option<f64>,
    pub flip_h: Option<bool>,
    pub flip_v: Option<bool>,
    pub mute: Option<bool>,
    pub output_format: Option<OutputFormat>,
    #[serde(default, deserialize_with = "present")]
    pub webp_frame_rate: Option<Option<f64>>,
    #[serde(default, deserialize_with = "present")]
    pub webp_quality: Option<Option<f64>>,
}

fn present<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[derive(Default)]
pub struct TransformStore {
    state: Mutex<TransformState>,
    subscribers: Subscribers<TransformChange>,
}

impl TransformStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> TransformState {
        self.state.lock().clone()
    }

    pub fn subscribe(
        &self,
        listener: impl Fn(&TransformChange) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.subscribers.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscribers.unsubscribe(id)
    }

    fn write(&self, field: TransformField, f: impl FnOnce(&mut TransformState)) {
        let state = {
            let mut guard = self.state.lock();
            f(&mut guard);
            guard.clone()
        };
        log::trace!(target: "crop_mov::store", "Transform field written: {:?}", field);
        self.subscribers.notify(&TransformChange {
            field: Some(field),
            state,
        });
    }

    pub fn set_time(&self, time: Option<Time>) {
        self.write(TransformField::Time, |s| s.time = time);
    }

    pub fn set_area(&self, area: Option<Area>) {
        self.write(TransformField::Area, |s| s.area = area);
    }

    pub fn set_scale(&self, scale: f64) {
        self.write(TransformField::Scale, |s| s.scale = scale);
    }

    pub fn set_flip_h(&self, flip_h: bool) {
        self.write(TransformField::FlipH, |s| s.flip_h = flip_h);
    }

    pub fn set_flip_v(&self, flip_v: bool) {
        self.write(TransformField::FlipV, |s| s.flip_v = flip_v);
    }

    pub fn set_mute(&self, mute: bool) {
        self.write(TransformField::Mute, |s| s.mute = mute);
    }

    pub fn set_output_format(&self, format: OutputFormat) {
        self.write(TransformField::OutputFormat, |s| s.output_format = format);
    }

    pub fn set_webp_frame_rate(&self, frame_rate: Option<f64>) {
        self.write(TransformField::WebpFrameRate, |s| {
            s.webp_frame_rate = frame_rate
        });
    }

    pub fn set_webp_quality(&self, quality: Option<f64>) {
        self.write(TransformField::WebpQuality, |s| s.webp_quality = quality);
    }

    /// Applies each field present in `patch` through its setter, in
    /// declaration order. Returns the fields written.
    pub fn apply(&self, patch: TransformPatch) -> Vec<TransformField> {
        let mut written = Vec::new();
        if let Some(time) = patch.time {
            self.set_time(time);
            written.push(TransformField::Time);
        }
        if let Some(area) = patch.area {
            self.set_area(area);
            written.push(TransformField::Area);
        }
        if let Some(scale) = patch.scale {
            self.set_scale(scale);
            written.push(TransformField::Scale);
        }
        if let Some(flip_h) = patch.flip_h {
            self.set_flip_h(flip_h);
            written.push(TransformField::FlipH);
        }
        if let Some(flip_v) = patch.flip_v {
            self.set_flip_v(flip_v);
            written.push(TransformField::FlipV);
        }
        if let Some(mute) = patch.mute {
            self.set_mute(mute);
            written.push(TransformField::Mute);
        }
        if let Some(format) = patch.output_format {
            self.set_output_format(format);
            written.push(TransformField::OutputFormat);
        }
        if let Some(frame_rate) = patch.webp_frame_rate {
            self.set_webp_frame_rate(frame_rate);
            written.push(TransformField::WebpFrameRate);
        }
        if let Some(quality) = patch.webp_quality {
            self.set_webp_quality(quality);
            written.push(TransformField::WebpQuality);
        }
        written
    }

    /// Replaces the state with defaults. Called when a new source is selected.
    pub fn reset(&self) {
        let state = {
            let mut guard = self.state.lock();
            *guard = TransformState::default();
            guard.clone()
        };
        self.subscribers.notify(&TransformChange { field: None, state });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn recording_store() -> (TransformStore, Arc<Mutex<Vec<TransformChange>>>) {
        let store = TransformStore::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        store.subscribe(move |change| sink.lock().push(change.clone()));
        (store, seen)
    }

    #[test]
    fn setter_notifies_with_field_and_snapshot() {
        let (store, seen) = recording_store();
        store.set_flip_h(true);
        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].field, Some(TransformField::FlipH));
        assert!(seen[0].state.flip_h);
        assert!(store.snapshot().flip_h);
    }

    #[test]
    fn writes_are_not_validated() {
        let store = TransformStore::new();
        store.set_scale(-3.0);
        store.set_time(Some((10.0, 2.0)));
        let snap = store.snapshot();
        assert_eq!(snap.scale, -3.0);
        assert_eq!(snap.time, Some((10.0, 2.0)));
    }

    #[test]
    fn unsubscribed_listener_is_not_called() {
        let store = TransformStore::new();
        let seen = Arc::new(Mutex::new(0usize));
        let sink = Arc::clone(&seen);
        let id = store.subscribe(move |_| *sink.lock() += 1);
        store.set_mute(true);
        assert!(store.unsubscribe(id));
        store.set_mute(false);
        assert_eq!(*seen.lock(), 1);
    }

    #[test]
    fn reset_restores_defaults_and_notifies() {
        let (store, seen) = recording_store();
        store.set_output_format(OutputFormat::Webp);
        store.set_area(Some((0.1, 0.1, 0.5, 0.5)));
        store.reset();
        assert_eq!(store.snapshot(), TransformState::default());
        let last = seen.lock().last().cloned().unwrap();
        assert_eq!(last.field, None);
    }

    #[test]
    fn patch_distinguishes_null_from_missing() {
        let store = TransformStore::new();
        store.set_time(Some((1.0, 2.0)));
        store.set_area(Some((0.0, 0.0, 0.5, 0.5)));

        let patch: TransformPatch =
            serde_json::from_str(r#"{"time": null, "flipV": true}"#).unwrap();
        let written = store.apply(patch);

        assert_eq!(written, vec![TransformField::Time, TransformField::FlipV]);
        let snap = store.snapshot();
        assert_eq!(snap.time, None);
        assert_eq!(snap.area, Some((0.0, 0.0, 0.5, 0.5)));
        assert!(snap.flip_v);
    }

    #[test]
    fn patch_notifies_once_per_field() {
        let (store, seen) = recording_store();
        let patch: TransformPatch = serde_json::from_str(
            r#"{"outputFormat": "webp", "webpQuality": 50, "webpFrameRate": 24}"#,
        )
        .unwrap();
        store.apply(patch);
        let fields: Vec<_> = seen.lock().iter().map(|c| c.field).collect();
        assert_eq!(
            fields,
            vec![
                Some(TransformField::OutputFormat),
                Some(TransformField::WebpFrameRate),
                Some(TransformField::WebpQuality),
            ]
        );
        let snap = store.snapshot();
        assert_eq!(snap.effective_webp_quality(), 50.0);
        assert_eq!(snap.effective_webp_frame_rate(), 24.0);
    }
}
