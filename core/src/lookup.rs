//! Static lookup tables for the calorie calculator and the food recommender.
//!
//! Keys are stored lowercase; queries are trimmed and lowercased before an exact match.
//! There is no partial or fuzzy matching.

use crate::error::{Result, TrackerError};

/// Typical calories for one serving of a common food.
const FOOD_CALORIES: &[(&str, u32)] = &[
    ("egg", 78),
    ("toast", 69),
    ("avocado", 234),
    ("banana", 105),
    ("apple", 95),
    ("chicken", 165),
    ("rice", 206),
    ("pasta", 158),
    ("salmon", 208),
    ("broccoli", 55),
    ("potato", 163),
    ("yogurt", 100),
    ("milk", 103),
    ("cheese", 113),
    ("oats", 389),
];

const SYMPTOM_RECOMMENDATIONS: &[(&str, &str)] = &[
    ("low energy", "Oats, Bananas, Nuts, Sweet Potato, Spinach"),
    ("headache", "Water, Watermelon, Almonds, Bananas, Seeds"),
    ("fatigue", "Leafy Greens, Salmon, Quinoa, Eggs, Berries"),
    (
        "stress",
        "Dark Chocolate, Green Tea, Avocado, Blueberries, Walnuts",
    ),
    (
        "poor sleep",
        "Almonds, Turkey, Chamomile Tea, Kiwi, Tart Cherry Juice",
    ),
    (
        "weak immunity",
        "Citrus Fruits, Ginger, Garlic, Turmeric, Yogurt",
    ),
    (
        "digestion issues",
        "Yogurt, Ginger, Papaya, Peppermint Tea, Whole Grains",
    ),
    (
        "muscle pain",
        "Tart Cherries, Turmeric, Salmon, Nuts, Leafy Greens",
    ),
];

fn normalize(key: &str) -> String {
    key.trim().to_lowercase()
}

pub fn lookup_calories(name: &str) -> Result<u32> {
    let key = normalize(name);
    FOOD_CALORIES
        .iter()
        .find(|(food, _)| *food == key)
        .map(|(_, calories)| *calories)
        .ok_or_else(|| TrackerError::NotFound(format!("no calorie entry for '{}'", name.trim())))
}

pub fn lookup_recommendation(symptom: &str) -> Result<&'static str> {
    let key = normalize(symptom);
    SYMPTOM_RECOMMENDATIONS
        .iter()
        .find(|(s, _)| *s == key)
        .map(|(_, foods)| *foods)
        .ok_or_else(|| {
            TrackerError::NotFound(format!("no recommendation for '{}'", symptom.trim()))
        })
}

/// Food names the calculator knows, in table order.
#[must_use]
pub fn known_foods() -> Vec<&'static str> {
    FOOD_CALORIES.iter().map(|(food, _)| *food).collect()
}

/// Symptoms the recommender knows, in table order.
#[must_use]
pub fn known_symptoms() -> Vec<&'static str> {
    SYMPTOM_RECOMMENDATIONS.iter().map(|(s, _)| *s).collect()
}
