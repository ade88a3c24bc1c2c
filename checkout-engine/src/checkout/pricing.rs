//! Pricing Engine
//!
//! Pure price computation for the checkout pipeline: campaign discounts per
//! line, cart subtotal, distance-tiered shipping, targeted-promotion
//! selection and reward-point redemption. Every discount step rounds to 2
//! decimal places before the next step so that totals re-derived from the
//! persisted per-line prices reproduce the stored grand total exactly.

use chrono::NaiveDate;
use rust_decimal::prelude::*;

use crate::checkout::money::round_money;
use shared::checkout::{
    CartLine, DiscountKind, DraftRequest, OrderLine, Promotion, PromotionKind, RedemptionChoice,
};

/// Shipping tiers: fee up to 20 / 40 / 60 km
const SHIPPING_NEAR: Decimal = Decimal::from_parts(590, 0, 0, false, 2);
const SHIPPING_MID: Decimal = Decimal::from_parts(790, 0, 0, false, 2);
const SHIPPING_FAR: Decimal = Decimal::from_parts(990, 0, 0, false, 2);
/// Surcharge per started 20 km beyond 60 km
const SHIPPING_STEP: Decimal = Decimal::from_parts(200, 0, 0, false, 2);

const KM_NEAR: Decimal = Decimal::from_parts(20, 0, 0, false, 0);
const KM_MID: Decimal = Decimal::from_parts(40, 0, 0, false, 0);
const KM_FAR: Decimal = Decimal::from_parts(60, 0, 0, false, 0);
const KM_STEP: Decimal = Decimal::from_parts(20, 0, 0, false, 0);

/// The fully priced cart, ready to be persisted as a draft order
#[derive(Debug, Clone, PartialEq)]
pub struct PriceQuote {
    /// Lines with the discounted unit price baked in
    pub lines: Vec<OrderLine>,
    /// Σ(charged unit price × qty)
    pub subtotal: Decimal,
    /// Σ((original − charged) × qty), for display
    pub campaign_savings: Decimal,
    /// Targeted-promotion discount on the subtotal
    pub targeted_discount: Decimal,
    /// The targeted promotion that produced the discount
    pub applied_promotion_id: Option<i64>,
    /// An explicitly chosen promotion did not meet its minimum spend
    pub targeted_ineligible: bool,
    /// Points the quote commits to redeem (after capping)
    pub redeem_points: u32,
    /// Monetary value of the redeemed points
    pub points_discount: Decimal,
    pub shipping_fee: Decimal,
    /// max(0, subtotal − min(points+targeted, subtotal) + shipping)
    pub total: Decimal,
}

/// Best single campaign discount for one line.
///
/// "Best" is the largest absolute discount among active campaign
/// promotions covering the product. Returns the charged unit price,
/// rounded, never below zero and never above the original.
pub fn apply_campaign_discount(
    line: &CartLine,
    promotions: &[Promotion],
    today: NaiveDate,
) -> Decimal {
    let original = line.unit_price_original;
    let mut best = original;

    for promo in promotions {
        if promo.kind != PromotionKind::Campaign
            || !promo.covers_product(line.product_id)
            || !promo.is_active(today)
        {
            continue;
        }
        let discounted = match promo.discount_kind {
            DiscountKind::Percentage => round_money(
                original * (Decimal::ONE_HUNDRED - promo.discount_value) / Decimal::ONE_HUNDRED,
            ),
            DiscountKind::FlatAmount => (original - promo.discount_value).max(Decimal::ZERO),
        };
        if discounted < best {
            best = discounted;
        }
    }

    round_money(best.clamp(Decimal::ZERO, original))
}

/// Price all lines and compute the subtotal plus the campaign savings
pub fn compute_subtotal(
    lines: &[CartLine],
    promotions: &[Promotion],
    today: NaiveDate,
) -> (Vec<OrderLine>, Decimal, Decimal) {
    let mut priced = Vec::with_capacity(lines.len());
    let mut subtotal = Decimal::ZERO;
    let mut savings = Decimal::ZERO;

    for line in lines {
        let charged = apply_campaign_discount(line, promotions, today);
        let qty = Decimal::from(line.quantity);
        subtotal += charged * qty;
        savings += (line.unit_price_original - charged) * qty;
        priced.push(OrderLine {
            product_id: line.product_id,
            quantity: line.quantity,
            unit_price_original: line.unit_price_original,
            unit_price_charged: charged,
            color_name: line.color_name.clone(),
            size: line.size.clone(),
        });
    }

    (priced, round_money(subtotal), round_money(savings))
}

/// Distance-tiered shipping fee. Monotonic non-decreasing in distance.
pub fn compute_shipping(distance_km: Decimal) -> Decimal {
    if distance_km <= KM_NEAR {
        SHIPPING_NEAR
    } else if distance_km <= KM_MID {
        SHIPPING_MID
    } else if distance_km <= KM_FAR {
        SHIPPING_FAR
    } else {
        let steps = ((distance_km - KM_FAR) / KM_STEP).ceil();
        round_money(SHIPPING_FAR + steps * SHIPPING_STEP)
    }
}

/// Result of targeted-promotion selection
#[derive(Debug, Clone, PartialEq)]
pub struct TargetedSelection {
    pub discount: Decimal,
    pub promotion_id: Option<i64>,
    /// Set when an explicitly chosen promotion was not eligible
    pub ineligible: bool,
}

impl TargetedSelection {
    fn none() -> Self {
        Self {
            discount: Decimal::ZERO,
            promotion_id: None,
            ineligible: false,
        }
    }
}

fn targeted_discount_value(promo: &Promotion, subtotal: Decimal) -> Decimal {
    let discount = match promo.discount_kind {
        DiscountKind::Percentage => {
            round_money(subtotal * promo.discount_value / Decimal::ONE_HUNDRED)
        }
        DiscountKind::FlatAmount => promo.discount_value,
    };
    discount.min(subtotal)
}

/// Select the targeted-promotion discount according to the user's choice.
///
/// `Auto` picks the maximum discount over all eligible promotions; ties are
/// broken by scan order (first found wins, strictly-greater comparison).
pub fn compute_targeted_discount(
    subtotal: Decimal,
    promotions: &[Promotion],
    user_id: i64,
    choice: &RedemptionChoice,
    today: NaiveDate,
) -> TargetedSelection {
    let usable = |promo: &Promotion| {
        promo.kind == PromotionKind::Targeted
            && promo.issued_to(user_id)
            && promo.is_active(today)
            && promo.has_capacity()
    };

    match choice {
        RedemptionChoice::Decline => TargetedSelection::none(),
        RedemptionChoice::Promotion(id) => {
            let Some(promo) = promotions.iter().find(|p| p.id == *id && usable(p)) else {
                return TargetedSelection {
                    discount: Decimal::ZERO,
                    promotion_id: None,
                    ineligible: true,
                };
            };
            if subtotal < promo.min_spend {
                return TargetedSelection {
                    discount: Decimal::ZERO,
                    promotion_id: None,
                    ineligible: true,
                };
            }
            TargetedSelection {
                discount: targeted_discount_value(promo, subtotal),
                promotion_id: Some(promo.id),
                ineligible: false,
            }
        }
        RedemptionChoice::Auto => {
            let mut best = TargetedSelection::none();
            for promo in promotions {
                if !usable(promo) || subtotal < promo.min_spend {
                    continue;
                }
                let discount = targeted_discount_value(promo, subtotal);
                // strictly greater: first-found wins ties
                if discount > best.discount {
                    best = TargetedSelection {
                        discount,
                        promotion_id: Some(promo.id),
                        ineligible: false,
                    };
                }
            }
            best
        }
    }
}

/// Cap a redemption request and price it.
///
/// `points = min(requested, balance, floor(subtotal / rate))`;
/// the discount is `round(points × rate, 2)`, never above the subtotal.
pub fn compute_points_discount(
    requested: u32,
    balance: u32,
    conversion_rate: Decimal,
    subtotal: Decimal,
) -> (u32, Decimal) {
    if requested == 0 || conversion_rate <= Decimal::ZERO || subtotal <= Decimal::ZERO {
        return (0, Decimal::ZERO);
    }
    let affordable = (subtotal / conversion_rate)
        .floor()
        .to_u32()
        .unwrap_or(u32::MAX);
    let points = requested.min(balance).min(affordable);
    let discount = round_money(Decimal::from(points) * conversion_rate).min(subtotal);
    (points, discount)
}

/// Grand total. The combined points + targeted discount is capped at the
/// subtotal; shipping is never discounted.
pub fn compute_grand_total(
    subtotal: Decimal,
    points_discount: Decimal,
    targeted_discount: Decimal,
    shipping: Decimal,
) -> Decimal {
    let discount = (points_discount + targeted_discount).min(subtotal);
    round_money((subtotal - discount + shipping).max(Decimal::ZERO))
}

/// Price a full draft request
pub fn quote(
    request: &DraftRequest,
    promotions: &[Promotion],
    balance: u32,
    conversion_rate: Decimal,
    today: NaiveDate,
) -> PriceQuote {
    let (lines, subtotal, campaign_savings) =
        compute_subtotal(&request.lines, promotions, today);
    let targeted =
        compute_targeted_discount(subtotal, promotions, request.user_id, &request.choice, today);
    let (redeem_points, points_discount) =
        compute_points_discount(request.redeem_points, balance, conversion_rate, subtotal);
    let shipping_fee = compute_shipping(request.distance_km);
    let total = compute_grand_total(subtotal, points_discount, targeted.discount, shipping_fee);

    PriceQuote {
        lines,
        subtotal,
        campaign_savings,
        targeted_discount: targeted.discount,
        applied_promotion_id: targeted.promotion_id,
        targeted_ineligible: targeted.ineligible,
        redeem_points,
        points_discount,
        shipping_fee,
        total,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(value: i64, scale: u32) -> Decimal {
        Decimal::new(value, scale)
    }

    fn today() -> NaiveDate {
        "2026-06-15".parse().unwrap()
    }

    fn line(product_id: i64, quantity: i32, price: Decimal) -> CartLine {
        CartLine {
            product_id,
            quantity,
            unit_price_original: price,
            color_name: None,
            size: None,
        }
    }

    fn campaign(id: i64, kind: DiscountKind, value: Decimal, product_ids: Vec<i64>) -> Promotion {
        Promotion {
            id,
            kind: PromotionKind::Campaign,
            discount_kind: kind,
            discount_value: value,
            min_spend: Decimal::ZERO,
            start_date: None,
            end_date: None,
            max_redemptions: None,
            redemption_count: 0,
            product_ids,
            user_ids: vec![],
        }
    }

    fn targeted(
        id: i64,
        kind: DiscountKind,
        value: Decimal,
        min_spend: Decimal,
        user_ids: Vec<i64>,
    ) -> Promotion {
        Promotion {
            id,
            kind: PromotionKind::Targeted,
            discount_kind: kind,
            discount_value: value,
            min_spend,
            start_date: None,
            end_date: None,
            max_redemptions: None,
            redemption_count: 0,
            product_ids: vec![],
            user_ids,
        }
    }

    // Campaign discount

    #[test]
    fn campaign_percentage_discount() {
        let promos = vec![campaign(1, DiscountKind::Percentage, dec(10, 0), vec![7])];
        let charged = apply_campaign_discount(&line(7, 1, dec(10000, 2)), &promos, today());
        assert_eq!(charged, dec(9000, 2)); // 100.00 -> 90.00
    }

    #[test]
    fn campaign_flat_discount_clamps_at_zero() {
        let promos = vec![campaign(1, DiscountKind::FlatAmount, dec(15, 0), vec![7])];
        let charged = apply_campaign_discount(&line(7, 1, dec(1000, 2)), &promos, today());
        assert_eq!(charged, Decimal::ZERO); // 10.00 - 15 -> 0
    }

    #[test]
    fn campaign_best_of_picks_largest_absolute_discount() {
        // 10% of 100 = 10 vs flat 12
        let promos = vec![
            campaign(1, DiscountKind::Percentage, dec(10, 0), vec![7]),
            campaign(2, DiscountKind::FlatAmount, dec(12, 0), vec![7]),
        ];
        let charged = apply_campaign_discount(&line(7, 1, dec(10000, 2)), &promos, today());
        assert_eq!(charged, dec(8800, 2));
    }

    #[test]
    fn campaign_ignores_inactive_and_unrelated_promotions() {
        let mut expired = campaign(1, DiscountKind::Percentage, dec(50, 0), vec![7]);
        expired.end_date = Some("2026-01-01".parse().unwrap());
        let other_product = campaign(2, DiscountKind::Percentage, dec(50, 0), vec![8]);
        let promos = vec![expired, other_product];
        let charged = apply_campaign_discount(&line(7, 1, dec(10000, 2)), &promos, today());
        assert_eq!(charged, dec(10000, 2));
    }

    #[test]
    fn subtotal_rounds_per_line() {
        // 33% off 9.99 -> 6.6933 rounds to 6.69 per unit, ×3 = 20.07
        let promos = vec![campaign(1, DiscountKind::Percentage, dec(33, 0), vec![7])];
        let (lines, subtotal, savings) =
            compute_subtotal(&[line(7, 3, dec(999, 2))], &promos, today());
        assert_eq!(lines[0].unit_price_charged, dec(669, 2));
        assert_eq!(subtotal, dec(2007, 2));
        assert_eq!(savings, dec(990, 2)); // (9.99-6.69)×3
    }

    // Shipping

    #[test]
    fn shipping_tier_boundaries() {
        assert_eq!(compute_shipping(Decimal::ZERO), dec(590, 2));
        assert_eq!(compute_shipping(dec(20, 0)), dec(590, 2));
        assert_eq!(compute_shipping(dec(21, 0)), dec(790, 2));
        assert_eq!(compute_shipping(dec(40, 0)), dec(790, 2));
        assert_eq!(compute_shipping(dec(60, 0)), dec(990, 2));
        assert_eq!(compute_shipping(dec(61, 0)), dec(1190, 2)); // one step beyond
        assert_eq!(compute_shipping(dec(80, 0)), dec(1190, 2));
        assert_eq!(compute_shipping(dec(81, 0)), dec(1390, 2));
    }

    #[test]
    fn shipping_is_monotonic() {
        // sweep in 0.5 km increments up to 300 km
        let mut prev = Decimal::ZERO;
        for half_km in 0..600 {
            let km = Decimal::new(half_km * 5, 1);
            let fee = compute_shipping(km);
            assert!(fee >= prev, "fee decreased at {} km", km);
            prev = fee;
        }
    }

    // Targeted promotions

    #[test]
    fn targeted_decline_applies_nothing() {
        let promos = vec![targeted(1, DiscountKind::FlatAmount, dec(20, 0), Decimal::ZERO, vec![9])];
        let sel = compute_targeted_discount(
            dec(200, 0),
            &promos,
            9,
            &RedemptionChoice::Decline,
            today(),
        );
        assert_eq!(sel, TargetedSelection::none());
    }

    #[test]
    fn targeted_explicit_choice_below_min_spend_reports_ineligible() {
        let promos = vec![targeted(1, DiscountKind::FlatAmount, dec(20, 0), dec(150, 0), vec![9])];
        let sel = compute_targeted_discount(
            dec(100, 0),
            &promos,
            9,
            &RedemptionChoice::Promotion(1),
            today(),
        );
        assert!(sel.ineligible);
        assert_eq!(sel.discount, Decimal::ZERO);
        assert_eq!(sel.promotion_id, None);
    }

    #[test]
    fn targeted_explicit_choice_applies_when_eligible() {
        let promos = vec![targeted(1, DiscountKind::Percentage, dec(10, 0), dec(150, 0), vec![9])];
        let sel = compute_targeted_discount(
            dec(200, 0),
            &promos,
            9,
            &RedemptionChoice::Promotion(1),
            today(),
        );
        assert_eq!(sel.discount, dec(20, 0));
        assert_eq!(sel.promotion_id, Some(1));
    }

    #[test]
    fn targeted_auto_picks_best_with_first_found_tie_break() {
        let promos = vec![
            targeted(1, DiscountKind::FlatAmount, dec(20, 0), Decimal::ZERO, vec![9]),
            targeted(2, DiscountKind::FlatAmount, dec(20, 0), Decimal::ZERO, vec![9]),
            targeted(3, DiscountKind::FlatAmount, dec(15, 0), Decimal::ZERO, vec![9]),
        ];
        let sel =
            compute_targeted_discount(dec(200, 0), &promos, 9, &RedemptionChoice::Auto, today());
        assert_eq!(sel.discount, dec(20, 0));
        assert_eq!(sel.promotion_id, Some(1)); // tie with id 2; first found wins
    }

    #[test]
    fn targeted_auto_skips_other_users_promotions() {
        let promos = vec![targeted(1, DiscountKind::FlatAmount, dec(20, 0), Decimal::ZERO, vec![4])];
        let sel =
            compute_targeted_discount(dec(200, 0), &promos, 9, &RedemptionChoice::Auto, today());
        assert_eq!(sel, TargetedSelection::none());
    }

    #[test]
    fn targeted_flat_discount_never_exceeds_subtotal() {
        let promos = vec![targeted(1, DiscountKind::FlatAmount, dec(500, 0), Decimal::ZERO, vec![9])];
        let sel =
            compute_targeted_discount(dec(50, 0), &promos, 9, &RedemptionChoice::Auto, today());
        assert_eq!(sel.discount, dec(50, 0));
    }

    // Points

    #[test]
    fn points_capped_by_balance() {
        let (points, discount) = compute_points_discount(1000, 300, dec(1, 2), dec(200, 0));
        assert_eq!(points, 300);
        assert_eq!(discount, dec(300, 2));
    }

    #[test]
    fn points_capped_by_subtotal() {
        // 5.00 subtotal at 0.01/pt affords 500 points
        let (points, discount) = compute_points_discount(1000, 1000, dec(1, 2), dec(500, 2));
        assert_eq!(points, 500);
        assert_eq!(discount, dec(500, 2));
    }

    #[test]
    fn zero_rate_redeems_nothing() {
        let (points, discount) = compute_points_discount(100, 100, Decimal::ZERO, dec(200, 0));
        assert_eq!(points, 0);
        assert_eq!(discount, Decimal::ZERO);
    }

    // Grand total

    #[test]
    fn grand_total_caps_combined_discount_at_subtotal() {
        let total = compute_grand_total(dec(100, 0), dec(80, 0), dec(50, 0), dec(590, 2));
        // discount capped at 100, shipping survives
        assert_eq!(total, dec(590, 2));
    }

    #[test]
    fn worked_scenario_rm_170_90() {
        // RM200 cart: one RM100 line with 10% campaign + one RM100 line.
        // Targeted auto best-of {RM20 off min RM150}. Redeem 500 pts at 0.01.
        // Shipping 15 km.
        let promos = vec![
            campaign(1, DiscountKind::Percentage, dec(10, 0), vec![7]),
            targeted(2, DiscountKind::FlatAmount, dec(20, 0), dec(150, 0), vec![9]),
        ];
        let request = DraftRequest {
            session_id: "sess-1".to_string(),
            user_id: 9,
            lines: vec![line(7, 1, dec(10000, 2)), line(8, 1, dec(10000, 2))],
            distance_km: dec(15, 0),
            address_id: None,
            choice: RedemptionChoice::Auto,
            redeem_points: 500,
        };
        let quote = quote(&request, &promos, 2000, dec(1, 2), today());

        assert_eq!(quote.subtotal, dec(19000, 2));
        assert_eq!(quote.campaign_savings, dec(1000, 2));
        assert_eq!(quote.targeted_discount, dec(2000, 2));
        assert_eq!(quote.applied_promotion_id, Some(2));
        assert_eq!(quote.redeem_points, 500);
        assert_eq!(quote.points_discount, dec(500, 2));
        assert_eq!(quote.shipping_fee, dec(590, 2));
        assert_eq!(quote.total, dec(17090, 2)); // 190 − 25 + 5.90
    }

    #[test]
    fn quote_totals_rederive_from_lines() {
        let promos = vec![campaign(1, DiscountKind::Percentage, dec(33, 0), vec![7])];
        let request = DraftRequest {
            session_id: "sess-1".to_string(),
            user_id: 9,
            lines: vec![line(7, 3, dec(999, 2)), line(8, 2, dec(4550, 2))],
            distance_km: dec(45, 0),
            address_id: None,
            choice: RedemptionChoice::Decline,
            redeem_points: 0,
        };
        let quote = quote(&request, &promos, 0, dec(1, 2), today());

        let rederived: Decimal = quote.lines.iter().map(|l| l.line_total()).sum();
        assert_eq!(round_money(rederived), quote.subtotal);
        assert_eq!(
            quote.total,
            quote.subtotal + quote.shipping_fee // no discounts requested
        );
    }
}
