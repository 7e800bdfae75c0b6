use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OutfitCategory {
    Top,
    Bottom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Outfit {
    pub url: &'static str,
    pub description: &'static str,
    pub category: OutfitCategory,
}

pub const SAMPLE_OUTFITS: &[Outfit] = &[
    Outfit {
        url: "https://storage.googleapis.com/aistudio-hosting/prompts/v-try-on/top1.png",
        description: "Denim Jacket",
        category: OutfitCategory::Top,
    },
    Outfit {
        url: "https://storage.googleapis.com/aistudio-hosting/prompts/v-try-on/top2.png",
        description: "White T-Shirt",
        category: OutfitCategory::Top,
    },
    Outfit {
        url: "https://storage.googleapis.com/aistudio-hosting/prompts/v-try-on/top3.png",
        description: "Striped Shirt",
        category: OutfitCategory::Top,
    },
    Outfit {
        url: "https://storage.googleapis.com/aistudio-hosting/prompts/v-try-on/bottom1.png",
        description: "Khaki Trousers",
        category: OutfitCategory::Bottom,
    },
    Outfit {
        url: "https://storage.googleapis.com/aistudio-hosting/prompts/v-try-on/bottom2.png",
        description: "Blue Jeans",
        category: OutfitCategory::Bottom,
    },
    Outfit {
        url: "https://storage.googleapis.com/aistudio-hosting/prompts/v-try-on/bottom3.png",
        description: "Black Skirt",
        category: OutfitCategory::Bottom,
    },
];

/// Looks up a library entry by its 1-based position.
pub fn outfit_by_number(number: u64) -> Option<&'static Outfit> {
    let idx = usize::try_from(number).ok()?.checked_sub(1)?;
    SAMPLE_OUTFITS.get(idx)
}

pub fn outfits_in(category: OutfitCategory) -> impl Iterator<Item = &'static Outfit> {
    SAMPLE_OUTFITS
        .iter()
        .filter(move |outfit| outfit.category == category)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIBRARY_BASE: &str = "https://storage.googleapis.com/aistudio-hosting/prompts/v-try-on";

    #[test]
    fn library_is_split_between_tops_and_bottoms() {
        assert_eq!(outfits_in(OutfitCategory::Top).count(), 3);
        assert_eq!(outfits_in(OutfitCategory::Bottom).count(), 3);
        assert!(SAMPLE_OUTFITS
            .iter()
            .all(|outfit| outfit.url.starts_with(LIBRARY_BASE)));
    }

    #[test]
    fn outfit_numbers_are_one_based() {
        assert_eq!(outfit_by_number(1).map(|o| o.description), Some("Denim Jacket"));
        assert_eq!(outfit_by_number(6).map(|o| o.description), Some("Black Skirt"));
        assert!(outfit_by_number(0).is_none());
        assert!(outfit_by_number(7).is_none());
    }
}
