mod common;

use chrono::Duration;
use common::{engine, parking, register_types, speeding, ticket_of};
use pvflow::domain::appeal::{AppealRuling, AppealStatus, AppealType, NewAppeal, StageCode, StageState};
use pvflow::domain::infraction::{InfractionFilter, InfractionStatus};
use pvflow::domain::money::{Amount, Money};
use pvflow::domain::payment::{NewPayment, PaymentMethod, PaymentStatus};
use pvflow::domain::ticket::{Decision, NewTicket, TicketFilter, TicketStatus};
use pvflow::error::LifecycleError;
use rust_decimal_macros::dec;

fn amount(value: rust_decimal::Decimal) -> Amount {
    Amount::new(value).unwrap()
}

fn appeal_on(ticket_id: pvflow::domain::ids::TicketId) -> NewAppeal {
    NewAppeal {
        ticket_id,
        type_recours: AppealType::Gracieux,
        motif: "Signalisation absente".to_string(),
        argumentaire: "Le panneau de limitation avait été retiré".to_string(),
        autorite_competente: Some("Préfecture".to_string()),
        date_limite_recours: None,
        observations: None,
    }
}

#[tokio::test]
async fn test_flagrant_speeding_is_priced_from_tier() {
    let (engine, _) = engine();
    register_types(&engine).await;

    let infraction = speeding(&engine, dec!(140), dec!(110), true).await;

    assert_eq!(infraction.montant_amende, Money::new(dec!(202.5)));
    assert_eq!(infraction.points_retires, 3);
    assert_eq!(infraction.statut, InfractionStatus::Constatee);
}

#[tokio::test]
async fn test_partial_payment_keeps_ticket_emis() {
    let (engine, _) = engine();
    register_types(&engine).await;
    let ticket = ticket_of(&engine, dec!(300)).await;

    let payment = engine
        .tickets
        .pay(ticket.id, amount(dec!(100)), PaymentMethod::Especes)
        .await
        .unwrap();
    assert_eq!(payment.statut, PaymentStatus::Valide);

    let aggregate = engine.tickets.load(ticket.id).await.unwrap();
    assert_eq!(aggregate.ticket.statut, TicketStatus::Emis);
    assert_eq!(aggregate.montant_restant, Money::new(dec!(200)));
    assert_eq!(aggregate.payments.len(), 1);
    assert_eq!(aggregate.infractions[0].statut, InfractionStatus::Validee);
}

#[tokio::test]
async fn test_majorated_ticket_paid_in_full() {
    let (engine, clock) = engine();
    register_types(&engine).await;
    let ticket = ticket_of(&engine, dec!(300)).await;

    clock.advance(Duration::days(46));
    engine
        .tickets
        .majorer(ticket.id, amount(dec!(450)), None)
        .await
        .unwrap();

    // The base amount no longer settles the ticket once the majoration applies.
    engine
        .tickets
        .pay(ticket.id, amount(dec!(300)), PaymentMethod::Cb)
        .await
        .unwrap();
    assert_eq!(
        engine.tickets.get(ticket.id).await.unwrap().statut,
        TicketStatus::Majore
    );

    engine
        .tickets
        .pay(ticket.id, amount(dec!(150)), PaymentMethod::Cb)
        .await
        .unwrap();

    let aggregate = engine.tickets.load(ticket.id).await.unwrap();
    assert_eq!(aggregate.ticket.statut, TicketStatus::Paye);
    assert_eq!(aggregate.montant_du, Money::new(dec!(450)));
    assert_eq!(aggregate.montant_restant, Money::ZERO);
    assert_eq!(aggregate.infractions[0].statut, InfractionStatus::Payee);
}

#[tokio::test]
async fn test_overpayment_is_rejected_without_side_effects() {
    let (engine, _) = engine();
    register_types(&engine).await;
    let ticket = ticket_of(&engine, dec!(300)).await;

    let result = engine
        .tickets
        .pay(ticket.id, amount(dec!(300.01)), PaymentMethod::Especes)
        .await;

    assert!(matches!(result, Err(LifecycleError::AmountMismatch(_))));
    let stored = engine.tickets.get(ticket.id).await.unwrap();
    assert_eq!(stored.montant_paye, Money::ZERO);
    assert!(engine.payments.for_ticket(ticket.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_paid_ticket_rejects_further_payment() {
    let (engine, _) = engine();
    register_types(&engine).await;
    let ticket = ticket_of(&engine, dec!(35)).await;
    engine
        .tickets
        .pay(ticket.id, amount(dec!(35)), PaymentMethod::MobileMoney)
        .await
        .unwrap();

    let result = engine
        .tickets
        .pay(ticket.id, amount(dec!(1)), PaymentMethod::MobileMoney)
        .await;
    assert!(matches!(result, Err(LifecycleError::AlreadyProcessed(_))));
}

#[tokio::test]
async fn test_partial_refusal_amends_ticket_total() {
    let (engine, _) = engine();
    register_types(&engine).await;
    let ticket = ticket_of(&engine, dec!(300)).await;

    let appeal = engine.appeals.file(appeal_on(ticket.id)).await.unwrap();
    engine.appeals.assign(appeal.id, "agent-7").await.unwrap();
    let ruling = AppealRuling::new(Decision::RefusePartiel, "Réduction accordée")
        .with_amount(amount(dec!(200)));
    let decided = engine
        .appeals
        .decide(appeal.id, ruling, "agent-7")
        .await
        .unwrap();

    assert_eq!(decided.statut, AppealStatus::Refuse);
    let ticket = engine.tickets.get(ticket.id).await.unwrap();
    assert_eq!(ticket.statut, TicketStatus::Emis);
    assert_eq!(ticket.montant_total, Money::new(dec!(200)));
    assert_eq!(ticket.active_appeal, None);
}

#[tokio::test]
async fn test_accepted_appeal_cancels_majorated_ticket() {
    let (engine, clock) = engine();
    register_types(&engine).await;
    let ticket = ticket_of(&engine, dec!(300)).await;
    clock.advance(Duration::days(50));
    engine
        .tickets
        .majorer(ticket.id, amount(dec!(450)), None)
        .await
        .unwrap();

    let appeal = engine.appeals.file(appeal_on(ticket.id)).await.unwrap();
    engine
        .appeals
        .decide(
            appeal.id,
            AppealRuling::new(Decision::Accepte, "Erreur matérielle"),
            "agent-7",
        )
        .await
        .unwrap();

    let aggregate = engine.tickets.load(ticket.id).await.unwrap();
    assert_eq!(aggregate.ticket.statut, TicketStatus::Annule);
    assert_eq!(aggregate.infractions[0].statut, InfractionStatus::Annulee);
    assert!(!aggregate.est_expire);

    let stages = engine.appeals.stages(appeal.id).await.unwrap();
    assert_eq!(stages.len(), 5);
    assert_eq!(stages[3].code, StageCode::Decision);
    assert_eq!(stages[3].statut, StageState::Terminee);
    assert_eq!(stages[4].statut, StageState::AVenir);
}

#[tokio::test]
async fn test_only_one_active_appeal_per_ticket() {
    let (engine, _) = engine();
    register_types(&engine).await;
    let ticket = ticket_of(&engine, dec!(300)).await;

    let first = engine.appeals.file(appeal_on(ticket.id)).await.unwrap();
    let second = engine.appeals.file(appeal_on(ticket.id)).await;
    assert!(matches!(
        second,
        Err(LifecycleError::InvalidTransition { .. })
    ));

    engine
        .appeals
        .abandon(first.id, "Paiement préféré")
        .await
        .unwrap();
    engine.appeals.file(appeal_on(ticket.id)).await.unwrap();
    assert_eq!(engine.appeals.active().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_appeal_against_paid_ticket_is_rejected() {
    let (engine, _) = engine();
    register_types(&engine).await;
    let ticket = ticket_of(&engine, dec!(35)).await;
    engine
        .tickets
        .pay(ticket.id, amount(dec!(35)), PaymentMethod::Especes)
        .await
        .unwrap();

    let result = engine.appeals.file(appeal_on(ticket.id)).await;
    assert!(matches!(
        result,
        Err(LifecycleError::InvalidTransition { .. })
    ));
    assert!(engine.appeals.for_ticket(ticket.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_validate_is_not_repeatable() {
    let (engine, _) = engine();
    register_types(&engine).await;
    let infraction = parking(&engine).await;

    let validated = engine.infractions.validate(infraction.id).await.unwrap();
    assert_eq!(validated.statut, InfractionStatus::Validee);

    let again = engine.infractions.validate(infraction.id).await;
    assert!(matches!(again, Err(LifecycleError::AlreadyProcessed(_))));
}

#[tokio::test]
async fn test_archive_only_from_paid_or_cancelled() {
    let (engine, _) = engine();
    register_types(&engine).await;

    let open = parking(&engine).await;
    assert!(matches!(
        engine.infractions.archive(open.id).await,
        Err(LifecycleError::InvalidTransition { .. })
    ));
    engine.infractions.contest(open.id).await.unwrap();
    assert!(matches!(
        engine.infractions.archive(open.id).await,
        Err(LifecycleError::InvalidTransition { .. })
    ));
    engine.infractions.cancel(open.id).await.unwrap();
    let archived = engine.infractions.archive(open.id).await.unwrap();
    assert_eq!(archived.statut, InfractionStatus::Archivee);

    let ticket = ticket_of(&engine, dec!(35)).await;
    engine
        .tickets
        .pay(ticket.id, amount(dec!(35)), PaymentMethod::Cheque)
        .await
        .unwrap();
    let paid = ticket.infraction_ids[0];
    engine.infractions.archive(paid).await.unwrap();
    let restored = engine.infractions.unarchive(paid).await.unwrap();
    assert_eq!(restored.statut, InfractionStatus::Payee);
}

#[tokio::test]
async fn test_infraction_belongs_to_a_single_ticket() {
    let (engine, _) = engine();
    register_types(&engine).await;
    let ticket = ticket_of(&engine, dec!(35)).await;
    let other = parking(&engine).await;

    let result = engine
        .tickets
        .issue(NewTicket {
            infraction_ids: vec![other.id, ticket.infraction_ids[0]],
            montant_total: Money::new(dec!(70)),
            date_limite_paiement: None,
            observations: None,
        })
        .await;

    assert!(matches!(result, Err(LifecycleError::AlreadyProcessed(_))));
    let tickets = engine.tickets.list(&TicketFilter::default()).await.unwrap();
    assert_eq!(tickets.len(), 1);
    let other = engine.infractions.get(other.id).await.unwrap();
    assert_eq!(other.numero_pv, None);
    assert_eq!(other.statut, InfractionStatus::Constatee);
}

#[tokio::test]
async fn test_treasury_receipt_settles_ticket() {
    let (engine, _) = engine();
    register_types(&engine).await;
    let infraction = speeding(&engine, dec!(140), dec!(110), true).await;
    let ticket = engine
        .tickets
        .generate_for_infraction(infraction.id)
        .await
        .unwrap();
    assert_eq!(ticket.montant_total, Money::new(dec!(202.5)));

    let payment = engine
        .payments
        .create(NewPayment {
            ticket_id: ticket.id,
            montant: amount(dec!(202.5)),
            moyen: PaymentMethod::TresorPublic,
            reference_externe: None,
            details: None,
        })
        .await
        .unwrap();
    assert_eq!(payment.statut, PaymentStatus::EnCours);

    let receipt = engine
        .payments
        .generate_treasury_receipt(payment.id, "Agent Koffi", "Bureau central")
        .await
        .unwrap();

    assert!(receipt.numero_recu.starts_with("RCU-TR-"));
    assert_eq!(receipt.numero_pv, ticket.numero_pv);
    assert_eq!(
        receipt.montant_en_lettres,
        "deux cent deux francs CFA et 50 centimes"
    );
    assert!(receipt.code_verification.starts_with("TRESOR|"));
    assert_eq!(
        engine.tickets.get(ticket.id).await.unwrap().statut,
        TicketStatus::Paye
    );
    assert_eq!(
        engine.payments.get(payment.id).await.unwrap().statut,
        PaymentStatus::Valide
    );

    let again = engine
        .payments
        .generate_treasury_receipt(payment.id, "Agent Koffi", "Bureau central")
        .await;
    assert!(matches!(again, Err(LifecycleError::AlreadyProcessed(_))));
}

#[tokio::test]
async fn test_refund_reopens_balance() {
    let (engine, _) = engine();
    register_types(&engine).await;
    let ticket = ticket_of(&engine, dec!(300)).await;

    let payment = engine
        .payments
        .create(NewPayment {
            ticket_id: ticket.id,
            montant: amount(dec!(100)),
            moyen: PaymentMethod::Virement,
            reference_externe: Some("VIR-001".to_string()),
            details: None,
        })
        .await
        .unwrap();
    engine.payments.validate(payment.id, "AUTH-42").await.unwrap();
    assert_eq!(
        engine.tickets.get(ticket.id).await.unwrap().montant_paye,
        Money::new(dec!(100))
    );

    let refunded = engine
        .payments
        .refund(payment.id, None, Some("Double paiement".to_string()))
        .await
        .unwrap();

    assert_eq!(refunded.statut, PaymentStatus::Rembourse);
    assert_eq!(
        engine.tickets.get(ticket.id).await.unwrap().montant_paye,
        Money::ZERO
    );
}

#[tokio::test]
async fn test_contestation_refused_returns_to_emis() {
    let (engine, _) = engine();
    register_types(&engine).await;
    let ticket = ticket_of(&engine, dec!(300)).await;

    let contested = engine
        .tickets
        .contest(ticket.id, "Véhicule vendu", Some("Tribunal de police".to_string()))
        .await
        .unwrap();
    assert_eq!(contested.statut, TicketStatus::Conteste);

    let decided = engine
        .tickets
        .decide_contestation(ticket.id, Decision::RefuseTotal, "Preuve insuffisante", None)
        .await
        .unwrap();
    assert_eq!(decided.statut, TicketStatus::Emis);
    assert_eq!(decided.montant_total, Money::new(dec!(300)));
}

#[tokio::test]
async fn test_ticket_deletion_guards() {
    let (engine, _) = engine();
    register_types(&engine).await;

    let with_payment = ticket_of(&engine, dec!(300)).await;
    engine
        .tickets
        .pay(with_payment.id, amount(dec!(50)), PaymentMethod::Especes)
        .await
        .unwrap();
    assert!(matches!(
        engine.tickets.delete(with_payment.id).await,
        Err(LifecycleError::ValidationError(_))
    ));

    let bare = ticket_of(&engine, dec!(35)).await;
    engine.tickets.delete(bare.id).await.unwrap();
    assert!(matches!(
        engine.tickets.get(bare.id).await,
        Err(LifecycleError::NotFound { .. })
    ));
    let released = engine.infractions.get(bare.infraction_ids[0]).await.unwrap();
    assert_eq!(released.numero_pv, None);
}

#[tokio::test]
async fn test_expired_tickets_are_derived_from_clock() {
    let (engine, clock) = engine();
    register_types(&engine).await;
    let unpaid = ticket_of(&engine, dec!(300)).await;
    let paid = ticket_of(&engine, dec!(35)).await;
    engine
        .tickets
        .pay(paid.id, amount(dec!(35)), PaymentMethod::Especes)
        .await
        .unwrap();

    assert!(engine.tickets.expired().await.unwrap().is_empty());

    clock.advance(Duration::days(46));
    let expired = engine.tickets.expired().await.unwrap();
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].id, unpaid.id);

    let stats = engine
        .tickets
        .statistics(&TicketFilter::default())
        .await
        .unwrap();
    assert_eq!(stats.total_pv, 2);
    assert_eq!(stats.pv_expires, 1);
    assert_eq!(stats.montant_paye, Money::new(dec!(35)));
}

#[tokio::test]
async fn test_infraction_filter_by_status() {
    let (engine, _) = engine();
    register_types(&engine).await;
    let validated = parking(&engine).await;
    engine.infractions.validate(validated.id).await.unwrap();
    speeding(&engine, dec!(95), dec!(90), false).await;

    let filter = InfractionFilter {
        statut: Some(InfractionStatus::Validee),
        ..InfractionFilter::default()
    };
    let found = engine.infractions.list(&filter).await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, validated.id);

    let stats = engine
        .infractions
        .statistics(&InfractionFilter::default())
        .await
        .unwrap();
    assert_eq!(stats.total, 2);
}

#[tokio::test]
async fn test_sub_cent_payments_are_settled_in_cents() {
    let (engine, _) = engine();
    register_types(&engine).await;
    let ticket = ticket_of(&engine, dec!(300)).await;

    let first = engine
        .tickets
        .pay(ticket.id, amount(dec!(100.005)), PaymentMethod::Especes)
        .await
        .unwrap();
    assert_eq!(first.montant, Money::new(dec!(100.01)));

    // 199.995 rounds to 200.00, one cent above what remains.
    let over = engine
        .tickets
        .pay(ticket.id, amount(dec!(199.995)), PaymentMethod::Especes)
        .await;
    assert!(matches!(over, Err(LifecycleError::AmountMismatch(_))));

    let dust = engine
        .tickets
        .pay(ticket.id, amount(dec!(0.004)), PaymentMethod::Especes)
        .await;
    assert!(matches!(dust, Err(LifecycleError::ValidationError(_))));
    let current = engine.tickets.get(ticket.id).await.unwrap();
    assert_eq!(current.montant_paye, Money::new(dec!(100.01)));
    assert_eq!(engine.payments.for_ticket(ticket.id).await.unwrap().len(), 1);

    engine
        .tickets
        .pay(ticket.id, amount(dec!(199.994)), PaymentMethod::Especes)
        .await
        .unwrap();
    let paid = engine.tickets.get(ticket.id).await.unwrap();
    assert_eq!(paid.statut, TicketStatus::Paye);
    assert_eq!(paid.montant_paye, Money::new(dec!(300)));
    let recorded: Money = engine
        .payments
        .for_ticket(ticket.id)
        .await
        .unwrap()
        .iter()
        .map(|p| p.montant)
        .sum();
    assert_eq!(recorded, paid.montant_paye);
}

#[tokio::test]
async fn test_paid_amount_matches_payment_records() {
    let (engine, _) = engine();
    register_types(&engine).await;
    let ticket = ticket_of(&engine, dec!(300)).await;

    engine
        .tickets
        .pay(ticket.id, amount(dec!(50.125)), PaymentMethod::Especes)
        .await
        .unwrap();
    let transfer = engine
        .payments
        .create(NewPayment {
            ticket_id: ticket.id,
            montant: amount(dec!(80.333)),
            moyen: PaymentMethod::Virement,
            reference_externe: Some("VIR-002".to_string()),
            details: None,
        })
        .await
        .unwrap();
    engine.payments.validate(transfer.id, "AUTH-7").await.unwrap();
    let refused = engine
        .payments
        .create(NewPayment {
            ticket_id: ticket.id,
            montant: amount(dec!(20.004)),
            moyen: PaymentMethod::Cb,
            reference_externe: None,
            details: None,
        })
        .await
        .unwrap();
    engine.payments.refuse(refused.id, "Carte expirée").await.unwrap();
    engine
        .payments
        .refund(transfer.id, Some(amount(dec!(10.005))), None)
        .await
        .unwrap();

    let payments = engine.payments.for_ticket(ticket.id).await.unwrap();
    let settled: Money = payments
        .iter()
        .filter(|p| matches!(p.statut, PaymentStatus::Valide | PaymentStatus::Rembourse))
        .map(|p| p.montant)
        .sum();
    let refunded: Money = payments.iter().filter_map(|p| p.montant_rembourse).sum();

    let current = engine.tickets.get(ticket.id).await.unwrap();
    assert_eq!(current.montant_paye, settled - refunded);
    assert_eq!(current.montant_paye, Money::new(dec!(120.45)));
    assert_eq!(current.statut, TicketStatus::Emis);
}

#[tokio::test]
async fn test_in_progress_lists_assigned_appeals_only() {
    let (engine, _) = engine();
    register_types(&engine).await;
    let first = ticket_of(&engine, dec!(300)).await;
    let second = ticket_of(&engine, dec!(90)).await;

    let filed = engine.appeals.file(appeal_on(first.id)).await.unwrap();
    let assigned = engine.appeals.file(appeal_on(second.id)).await.unwrap();
    engine.appeals.assign(assigned.id, "agent-7").await.unwrap();

    let in_progress = engine.appeals.in_progress().await.unwrap();
    assert_eq!(in_progress.len(), 1);
    assert_eq!(in_progress[0].id, assigned.id);
    assert_eq!(in_progress[0].statut, AppealStatus::EnCours);

    let active = engine.appeals.active().await.unwrap();
    assert_eq!(active.len(), 2);
    assert!(active.iter().any(|a| a.id == filed.id));
}

#[tokio::test]
async fn test_accepted_appeal_keeps_amount_paid_meanwhile() {
    let (engine, _) = engine();
    register_types(&engine).await;
    let ticket = ticket_of(&engine, dec!(35)).await;
    let appeal = engine.appeals.file(appeal_on(ticket.id)).await.unwrap();

    let payment = engine
        .tickets
        .pay(ticket.id, amount(dec!(35)), PaymentMethod::Especes)
        .await
        .unwrap();
    assert_eq!(
        engine.tickets.get(ticket.id).await.unwrap().statut,
        TicketStatus::Paye
    );

    engine
        .appeals
        .decide(
            appeal.id,
            AppealRuling::new(Decision::Accepte, "Signalisation absente"),
            "agent-7",
        )
        .await
        .unwrap();

    let cancelled = engine.tickets.get(ticket.id).await.unwrap();
    assert_eq!(cancelled.statut, TicketStatus::Annule);
    assert_eq!(cancelled.montant_paye, Money::new(dec!(35)));
    let kept = engine.payments.get(payment.id).await.unwrap();
    assert_eq!(kept.statut, PaymentStatus::Valide);
    assert!(kept.montant_rembourse.is_none());
}
