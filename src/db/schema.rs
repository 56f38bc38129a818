table! {
    senders (id) {
        id -> Integer,
        email -> Text,
        name -> Text,
    }
}

table! {
    newsletters (id) {
        id -> Integer,
        name -> Text,
        active -> Bool,
        sender_id -> Integer,
        subject -> Text,
        reply_email -> Text,
        language -> Text,
        template -> Text,
        utm_source -> Text,
        utm_medium -> Text,
    }
}

table! {
    content_blocks (id) {
        id -> Integer,
        newsletter_id -> Integer,
        region -> Text,
        position -> Integer,
        markdown -> Bool,
        body -> Text,
    }
}

table! {
    jobs (id) {
        id -> Integer,
        newsletter_id -> Nullable<Integer>,
        status -> Integer,
        date_created -> Timestamp,
        date_deliver_start -> Nullable<Timestamp>,
        date_deliver_finished -> Nullable<Timestamp>,
        group_kind -> Text,
        group_id -> Integer,
        utm_campaign -> Text,
    }
}

table! {
    mails (id) {
        id -> Integer,
        job_id -> Integer,
        person_kind -> Text,
        person_id -> Integer,
        hash -> Text,
        viewed -> Bool,
        bounced -> Bool,
        sent -> Bool,
    }
}

table! {
    links (id) {
        id -> Integer,
        job_id -> Integer,
        hash -> Text,
        target -> Text,
        click_count -> Integer,
    }
}

table! {
    mailing_lists (id) {
        id -> Integer,
        name -> Text,
    }
}

table! {
    subscribers (id) {
        id -> Integer,
        mailing_list_id -> Integer,
        email -> Text,
        name -> Text,
    }
}

table! {
    mail_unsubscribes (id) {
        id -> Integer,
        email -> Text,
        mailing_list_id -> Integer,
    }
}

joinable!(content_blocks -> newsletters (newsletter_id));
joinable!(links -> jobs (job_id));
joinable!(mail_unsubscribes -> mailing_lists (mailing_list_id));
joinable!(mails -> jobs (job_id));
joinable!(newsletters -> senders (sender_id));
joinable!(subscribers -> mailing_lists (mailing_list_id));

allow_tables_to_appear_in_same_query!(
    senders,
    newsletters,
    content_blocks,
    jobs,
    mails,
    links,
    mailing_lists,
    subscribers,
    mail_unsubscribes,
);
