// 场地评分
// 分类、名称关键字、营业状态和评分共同决定候选场所是否可用

use std::cmp::Ordering;

use serde::Serialize;

use super::provider::{BusinessStatus, VenueCandidate};
use crate::database::Venue;
use crate::location::Confidence;

/// 允许的主分类
const ALLOWED_CATEGORIES: &[&str] = &[
    "bar",
    "pub",
    "night_club",
    "brewery",
    "restaurant",
    "cafe",
];

/// 分类命中任意一项直接拒绝
const FORBIDDEN_CATEGORIES: &[&str] = &[
    "bank",
    "atm",
    "finance",
    "pharmacy",
    "hospital",
    "doctor",
    "dentist",
    "school",
    "place_of_worship",
    "church",
    "police",
    "gas_station",
    "lodging",
    "supermarket",
];

/// 名称包含任意一个关键字直接拒绝，包括组合词（如 "Hotelbar"）。
/// "atm" 只按分类拦截，作为子串会命中 "atmosphere"。
const FORBIDDEN_KEYWORDS: &[&str] = &[
    "bank",
    "sparkasse",
    "apotheke",
    "pharmacy",
    "klinik",
    "clinic",
    "hospital",
    "tankstelle",
    "hotel",
    "hostel",
];

const BAR_KEYWORDS: &[&str] = &[
    "bar",
    "pub",
    "kneipe",
    "tavern",
    "lounge",
    "brew",
    "taproom",
    "biergarten",
    "beer",
    "cocktail",
    "wein",
    "wine",
];

pub const MIN_SCORE: i32 = 70;
const HIGH_CONFIDENCE_SCORE: i32 = 90;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Rejection {
    ForbiddenKeyword(String),
    ForbiddenCategory(String),
    PermanentlyClosed,
    LowScore,
    LowConfidence,
}

#[derive(Debug, Clone, Serialize)]
pub struct Assessment {
    pub candidate: VenueCandidate,
    pub display_name: String,
    pub score: i32,
    pub confidence: Confidence,
    pub rejection: Option<Rejection>,
}

impl Assessment {
    pub fn is_accepted(&self) -> bool {
        self.rejection.is_none()
    }

    pub fn to_venue(&self) -> Venue {
        Venue {
            name: self.display_name.clone(),
            address: self.candidate.formatted_address.clone(),
            latitude: self.candidate.coordinates.map(|c| c.latitude),
            longitude: self.candidate.coordinates.map(|c| c.longitude),
            place_id: Some(self.candidate.place_id.clone()),
        }
    }
}

/// 分数达到阈值且可信度不低于 medium 才接受
pub fn accepts(score: i32, confidence: Confidence) -> bool {
    score >= MIN_SCORE && confidence >= Confidence::Medium
}

fn looks_like_name(name: &str) -> bool {
    let name = name.trim();
    name.chars().count() >= 2 && name.chars().any(char::is_alphabetic)
}

fn placeholder_name(place_id: &str) -> String {
    let short: String = place_id.chars().take(6).collect();
    format!("Venue {}", short)
}

/// 展示名：服务商名称 → 地址的第一段（非纯数字）→ 由ID生成的占位名。
/// 第二个返回值表示是否使用了占位名。
pub fn display_name(candidate: &VenueCandidate) -> (String, bool) {
    if let Some(name) = candidate.name.as_deref().filter(|n| looks_like_name(n)) {
        return (name.trim().to_string(), false);
    }

    let from_address = candidate
        .formatted_address
        .as_deref()
        .and_then(|addr| addr.split(',').next())
        .map(str::trim)
        .filter(|seg| {
            !seg.is_empty() && !seg.chars().all(|c| c.is_ascii_digit() || c.is_whitespace())
        });
    if let Some(segment) = from_address {
        return (segment.to_string(), false);
    }

    (placeholder_name(&candidate.place_id), true)
}

fn hard_rejection(candidate: &VenueCandidate, lowered_name: &str) -> Option<Rejection> {
    if let Some(keyword) = FORBIDDEN_KEYWORDS.iter().find(|k| lowered_name.contains(*k)) {
        return Some(Rejection::ForbiddenKeyword(keyword.to_string()));
    }

    if let Some(category) = candidate
        .categories
        .iter()
        .find(|c| FORBIDDEN_CATEGORIES.contains(&c.as_str()))
    {
        return Some(Rejection::ForbiddenCategory(category.clone()));
    }

    if candidate.business_status == Some(BusinessStatus::ClosedPermanently) {
        return Some(Rejection::PermanentlyClosed);
    }

    None
}

pub fn assess(candidate: &VenueCandidate) -> Assessment {
    let (display_name, is_placeholder) = display_name(candidate);
    let lowered = display_name.to_lowercase();

    if let Some(rejection) = hard_rejection(candidate, &lowered) {
        return Assessment {
            candidate: candidate.clone(),
            display_name,
            score: 0,
            confidence: Confidence::Low,
            rejection: Some(rejection),
        };
    }

    let mut score = 0;

    let primary = candidate.categories.first().map(String::as_str);
    score += match primary {
        Some(c) if ALLOWED_CATEGORIES.contains(&c) => 60,
        _ => -40,
    };

    score += if BAR_KEYWORDS.iter().any(|k| lowered.contains(k)) {
        30
    } else {
        -20
    };

    if candidate.business_status == Some(BusinessStatus::Operational) {
        score += 15;
    }

    score += match candidate.rating {
        Some(r) if r >= 4.0 => 10,
        Some(r) if r >= 3.5 => 5,
        _ => 0,
    };

    let mut confidence = if score >= HIGH_CONFIDENCE_SCORE {
        Confidence::High
    } else if score >= MIN_SCORE {
        Confidence::Medium
    } else {
        Confidence::Low
    };
    if candidate.coordinates.is_none() {
        confidence = Confidence::Low;
    } else if is_placeholder {
        confidence = confidence.min(Confidence::Medium);
    }

    let rejection = if score < MIN_SCORE {
        Some(Rejection::LowScore)
    } else if !accepts(score, confidence) {
        Some(Rejection::LowConfidence)
    } else {
        None
    };

    Assessment {
        candidate: candidate.clone(),
        display_name,
        score,
        confidence,
        rejection,
    }
}

/// 分数最高的可用候选，分数相同时比较评分，再按ID
pub fn pick_best(candidates: &[VenueCandidate]) -> Option<Assessment> {
    let mut accepted: Vec<Assessment> = candidates
        .iter()
        .map(assess)
        .filter(Assessment::is_accepted)
        .collect();

    accepted.sort_by(|a, b| {
        b.score
            .cmp(&a.score)
            .then_with(|| {
                b.candidate
                    .rating
                    .unwrap_or(0.0)
                    .partial_cmp(&a.candidate.rating.unwrap_or(0.0))
                    .unwrap_or(Ordering::Equal)
            })
            .then_with(|| a.candidate.place_id.cmp(&b.candidate.place_id))
    });
    accepted.into_iter().next()
}
