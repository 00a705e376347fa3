//! Avocado ripeness classes as presented to the user.

use serde::Serialize;

/// Overlay colour for labels outside the catalogue.
pub const DEFAULT_COLOR: &str = "#3b82f6";

/// Catalogue entry used when a label cannot be matched.
pub const FALLBACK_LABEL: &str = "Matang";

/// Below this confidence the overlay colour is drawn at half opacity.
pub const LOW_CONFIDENCE: f32 = 0.5;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct ClassInfo {
    pub label: &'static str,
    pub color: &'static str,
    pub shelf_life: &'static str,
    pub recommendation: &'static str,
    pub description: &'static str,
}

/// The five ripeness stages, in label-file order.
pub const CLASSES: [ClassInfo; 5] = [
    ClassInfo {
        label: "Belum Matang",
        color: "#22c55e",
        shelf_life: "5–7 hari",
        recommendation: "Simpan pada suhu ruang. Jangan masukkan ke kulkas agar proses pematangan tetap berlangsung. Butuh beberapa hari hingga mulai melunak.",
        description: "Alpukat masih keras dengan kulit hijau terang. Daging buah padat dan belum layak konsumsi.",
    },
    ClassInfo {
        label: "Mulai Matang",
        color: "#eab308",
        shelf_life: "2–3 hari",
        recommendation: "Diamkan 1–2 hari lagi hingga mencapai kematangan yang diinginkan. Bisa dipercepat dengan menyimpan bersama apel atau pisang.",
        description: "Alpukat mulai menggelap dan sedikit empuk. Rasa mulai terbentuk tetapi belum sepenuhnya creamy.",
    },
    ClassInfo {
        label: "Matang",
        color: "#f59e0b",
        shelf_life: "1-2 hari",
        recommendation: "Siap dikonsumsi. Jika belum ingin digunakan, simpan di kulkas untuk memperlambat pematangan.",
        description: "Kulit gelap dan buah empuk ketika ditekan. Rasa creamy dan tekstur lembut.",
    },
    ClassInfo {
        label: "Matang Sempurna",
        color: "#f97316",
        shelf_life: "< 1 hari",
        recommendation: "Konsumsi segera. Bisa disimpan sebentar di kulkas agar tidak cepat melunak.",
        description: "Tekstur sangat creamy, empuk, dan rasa paling optimal. Kondisi ini hanya bertahan sebentar.",
    },
    ClassInfo {
        label: "Terlalu Matang",
        color: "#ef4444",
        shelf_life: "Sudah melewati masa simpan",
        recommendation: "Bagian yang dagingnya masih hijau kekuningan dan tidak berbau masih dapat dikonsumsi. Buang bagian yang coklat gelap atau berlendir.",
        description: "Alpukat sangat lembek, sebagian daging mungkin berubah kecoklatan.",
    },
];

/// Labels of the built-in catalogue, used when no label file is configured.
pub fn default_labels() -> Vec<String> {
    CLASSES.iter().map(|class| class.label.to_string()).collect()
}

/// Catalogue entry for a model label.
///
/// Exact match first, then case-insensitive; anything else falls back to
/// "Matang" with a warning.
pub fn class_info(label: &str) -> &'static ClassInfo {
    let label = label.trim();
    if let Some(info) = CLASSES.iter().find(|class| class.label == label) {
        return info;
    }
    if let Some(info) = CLASSES
        .iter()
        .find(|class| class.label.to_lowercase() == label.to_lowercase())
    {
        return info;
    }
    log::warn!(
        "label '{}' not in ripeness catalogue, using '{}'",
        label,
        FALLBACK_LABEL
    );
    fallback()
}

fn fallback() -> &'static ClassInfo {
    &CLASSES[2]
}

/// Overlay colour for a detection; faded when confidence is low.
pub fn overlay_color(label: &str, confidence: f32) -> String {
    let base = CLASSES
        .iter()
        .find(|class| class.label == label)
        .map(|class| class.color)
        .unwrap_or(DEFAULT_COLOR);
    if confidence < LOW_CONFIDENCE {
        format!("{}80", base)
    } else {
        base.to_string()
    }
}
